// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event subscriptions - an execution waiting for a signal, message or
//! other event.

use chrono::{DateTime, Utc};

use super::{Entity, Revisioned};

/// One event subscription held by an execution.
#[derive(Debug, Clone)]
pub struct EventSubscriptionEntity {
    /// Subscription id.
    pub id: String,
    /// Optimistic-lock revision.
    pub revision: i32,
    /// Event type ("signal", "message", ...).
    pub event_type: String,
    /// Event name, if the event carries one.
    pub event_name: Option<String>,
    /// Execution holding the subscription.
    pub execution_id: Option<String>,
    /// Process instance the subscription belongs to.
    pub process_instance_id: Option<String>,
    /// Activity that will handle the event.
    pub activity_id: Option<String>,
    /// Definition of the process instance.
    pub process_definition_id: Option<String>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Tenant id.
    pub tenant_id: Option<String>,
}

impl EventSubscriptionEntity {
    /// Create a subscription of the given event type.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: 1,
            event_type: event_type.into(),
            event_name: None,
            execution_id: None,
            process_instance_id: None,
            activity_id: None,
            process_definition_id: None,
            created: Utc::now(),
            tenant_id: None,
        }
    }
}

impl Entity for EventSubscriptionEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Revisioned for EventSubscriptionEntity {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}
