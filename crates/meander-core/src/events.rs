// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle events and the dispatcher contract.
//!
//! Dispatch is fire-and-forget from the core's point of view: a
//! dispatcher failure must not roll back the command that produced the
//! event. Bulk deletions fetch the affected rows first and dispatch one
//! event per row, so observers never see fewer events than rows.

use std::sync::Mutex;

use crate::entities::JobKind;

/// The entity kinds named in lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// An execution.
    Execution,
    /// A user task.
    Task,
    /// A job.
    Job,
    /// A variable instance.
    Variable,
    /// An event subscription.
    EventSubscription,
    /// An identity link.
    IdentityLink,
    /// An entity link.
    EntityLink,
    /// An activity-instance audit row.
    ActivityInstance,
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EngineEvent {
    /// An entity row was created.
    EntityCreated {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: String,
    },
    /// An entity finished initialization (relations wired).
    EntityInitialized {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: String,
    },
    /// An entity row was (or is about to be bulk-) deleted.
    EntityDeleted {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: String,
    },
    /// An in-flight activity was cancelled.
    ActivityCancelled {
        /// Execution that occupied the activity.
        execution_id: String,
        /// Its process instance.
        process_instance_id: String,
        /// The activity, when known.
        activity_id: Option<String>,
        /// Cancellation cause.
        reason: Option<String>,
    },
    /// A whole process instance was cancelled.
    ProcessCancelled {
        /// The process instance.
        process_instance_id: String,
        /// Cancellation cause.
        reason: Option<String>,
    },
    /// A process instance completed normally.
    ProcessCompleted {
        /// The process instance.
        process_instance_id: String,
    },
    /// A job was removed before running.
    JobCancelled {
        /// The job.
        job_id: String,
        /// Its kind.
        kind: JobKind,
        /// The execution it referenced.
        execution_id: Option<String>,
    },
    /// A variable was created.
    VariableCreated {
        /// Variable-instance id.
        variable_id: String,
        /// Variable name.
        name: String,
    },
    /// A variable's value was updated.
    VariableUpdated {
        /// Variable-instance id.
        variable_id: String,
        /// Variable name.
        name: String,
    },
    /// A variable was removed.
    VariableDeleted {
        /// Variable-instance id.
        variable_id: String,
        /// Variable name.
        name: String,
    },
}

impl EngineEvent {
    /// Stable type tag, for observers that filter by kind.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } => "entity-created",
            Self::EntityInitialized { .. } => "entity-initialized",
            Self::EntityDeleted { .. } => "entity-deleted",
            Self::ActivityCancelled { .. } => "activity-cancelled",
            Self::ProcessCancelled { .. } => "process-cancelled",
            Self::ProcessCompleted { .. } => "process-completed",
            Self::JobCancelled { .. } => "job-cancelled",
            Self::VariableCreated { .. } => "variable-created",
            Self::VariableUpdated { .. } => "variable-updated",
            Self::VariableDeleted { .. } => "variable-deleted",
        }
    }
}

/// Event dispatcher contract.
pub trait EventDispatcher: Send + Sync {
    /// Whether dispatch is active. Producers skip event construction
    /// (and the row fetches that feed it) when disabled.
    fn is_enabled(&self) -> bool;

    /// Deliver one event.
    fn dispatch(&self, event: EngineEvent);
}

/// Dispatcher that drops everything.
#[derive(Debug, Default)]
pub struct NoopDispatcher;

impl EventDispatcher for NoopDispatcher {
    fn is_enabled(&self) -> bool {
        false
    }

    fn dispatch(&self, _event: EngineEvent) {}
}

/// Dispatcher that records every event, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingDispatcher {
    events: Mutex<Vec<EngineEvent>>,
}

impl CollectingDispatcher {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events dispatched so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events matching a type tag, in dispatch order.
    pub fn events_of_type(&self, type_tag: &str) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.type_tag() == type_tag)
            .cloned()
            .collect()
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventDispatcher for CollectingDispatcher {
    fn is_enabled(&self) -> bool {
        true
    }

    fn dispatch(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_dispatcher_records_in_order() {
        let dispatcher = CollectingDispatcher::new();
        dispatcher.dispatch(EngineEvent::EntityCreated {
            kind: EntityKind::Execution,
            entity_id: "e1".to_string(),
        });
        dispatcher.dispatch(EngineEvent::ProcessCompleted {
            process_instance_id: "pi".to_string(),
        });

        let events = dispatcher.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_tag(), "entity-created");
        assert_eq!(events[1].type_tag(), "process-completed");
        assert_eq!(dispatcher.events_of_type("process-completed").len(), 1);
    }

    #[test]
    fn test_noop_dispatcher_is_disabled() {
        assert!(!NoopDispatcher.is_enabled());
    }
}
