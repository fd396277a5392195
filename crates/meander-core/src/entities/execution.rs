// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The execution entity - one token of control flow in a process
//! instance, and the node type of the execution tree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use chrono::{DateTime, Utc};

use super::{Entity, JobKind, Lazy, Revisioned, SuspensionState};

/// Persisted related-entity base counts for one execution.
///
/// Only meaningful while counting is enabled for the execution; the
/// effective count within a command is base + accumulated delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityCounts {
    /// Event subscriptions attached to this execution.
    pub event_subscriptions: i32,
    /// User tasks attached to this execution.
    pub tasks: i32,
    /// Async jobs referencing this execution.
    pub jobs: i32,
    /// Timer jobs referencing this execution.
    pub timer_jobs: i32,
    /// Suspended jobs referencing this execution.
    pub suspended_jobs: i32,
    /// Dead-letter jobs referencing this execution.
    pub dead_letter_jobs: i32,
    /// External-worker jobs referencing this execution.
    pub external_worker_jobs: i32,
    /// Variables local to this execution.
    pub variables: i32,
    /// Identity links on this execution (process-instance scope).
    pub identity_links: i32,
}

/// In-command count adjustments, accumulated atomically so several
/// modifications within one unit of work cannot lose updates. Each
/// counter pairs with its own delta; job and timer-job deltas are
/// independent.
#[derive(Debug, Default)]
pub struct CountDeltas {
    event_subscriptions: AtomicI32,
    tasks: AtomicI32,
    jobs: AtomicI32,
    timer_jobs: AtomicI32,
    suspended_jobs: AtomicI32,
    dead_letter_jobs: AtomicI32,
    external_worker_jobs: AtomicI32,
    variables: AtomicI32,
    identity_links: AtomicI32,
}

impl CountDeltas {
    /// Adjust the event-subscription delta.
    pub fn add_event_subscriptions(&self, delta: i32) {
        self.event_subscriptions.fetch_add(delta, Ordering::SeqCst);
    }

    /// Adjust the task delta.
    pub fn add_tasks(&self, delta: i32) {
        self.tasks.fetch_add(delta, Ordering::SeqCst);
    }

    /// Adjust the delta for one job kind.
    pub fn add_jobs(&self, kind: JobKind, delta: i32) {
        self.job_cell(kind).fetch_add(delta, Ordering::SeqCst);
    }

    /// Adjust the variable delta.
    pub fn add_variables(&self, delta: i32) {
        self.variables.fetch_add(delta, Ordering::SeqCst);
    }

    /// Adjust the identity-link delta.
    pub fn add_identity_links(&self, delta: i32) {
        self.identity_links.fetch_add(delta, Ordering::SeqCst);
    }

    /// Current event-subscription delta.
    pub fn event_subscriptions(&self) -> i32 {
        self.event_subscriptions.load(Ordering::SeqCst)
    }

    /// Current task delta.
    pub fn tasks(&self) -> i32 {
        self.tasks.load(Ordering::SeqCst)
    }

    /// Current delta for one job kind.
    pub fn jobs(&self, kind: JobKind) -> i32 {
        self.job_cell(kind).load(Ordering::SeqCst)
    }

    /// Current variable delta.
    pub fn variables(&self) -> i32 {
        self.variables.load(Ordering::SeqCst)
    }

    /// Current identity-link delta.
    pub fn identity_links(&self) -> i32 {
        self.identity_links.load(Ordering::SeqCst)
    }

    /// Whether any delta is non-zero.
    pub fn is_dirty(&self) -> bool {
        self.event_subscriptions() != 0
            || self.tasks() != 0
            || JobKind::ALL.iter().any(|kind| self.jobs(*kind) != 0)
            || self.variables() != 0
            || self.identity_links() != 0
    }

    fn job_cell(&self, kind: JobKind) -> &AtomicI32 {
        match kind {
            JobKind::Message => &self.jobs,
            JobKind::Timer => &self.timer_jobs,
            JobKind::Suspended => &self.suspended_jobs,
            JobKind::DeadLetter => &self.dead_letter_jobs,
            JobKind::ExternalWorker => &self.external_worker_jobs,
        }
    }
}

impl Clone for CountDeltas {
    fn clone(&self) -> Self {
        let cloned = CountDeltas::default();
        cloned.add_event_subscriptions(self.event_subscriptions());
        cloned.add_tasks(self.tasks());
        for kind in JobKind::ALL {
            cloned.add_jobs(kind, self.jobs(kind));
        }
        cloned.add_variables(self.variables());
        cloned.add_identity_links(self.identity_links());
        cloned
    }
}

/// One execution: the atomic unit of process runtime state.
///
/// A process-instance execution is its own `process_instance_id` and
/// has no parent. Tree edges (`parent_id`, children) stay within one
/// process instance; `super_execution_id`/`sub_process_instance_id`
/// cross process instances for call activities and are always wired as
/// a pair by the tree manager.
#[derive(Debug, Clone)]
pub struct ExecutionEntity {
    /// Execution id.
    pub id: String,
    /// Optimistic-lock revision.
    pub revision: i32,
    /// Definition this execution runs.
    pub process_definition_id: String,
    /// Definition key, denormalized for queries.
    pub process_definition_key: Option<String>,
    /// The owning process instance (self for roots).
    pub process_instance_id: String,
    /// The root of the call-activity chain this execution belongs to.
    pub root_process_instance_id: String,
    /// Parent execution within the same process instance.
    pub parent_id: Option<String>,
    /// Calling execution in another process instance (call activity).
    pub super_execution_id: Option<String>,
    /// Called process instance root, inverse of `super_execution_id`.
    pub sub_process_instance_id: Option<String>,
    /// Flow element the execution currently occupies.
    pub current_activity_id: Option<String>,
    /// Whether the execution is runnable.
    pub is_active: bool,
    /// Whether the execution has finished.
    pub is_ended: bool,
    /// Whether this execution owns a variable/activity scope.
    pub is_scope: bool,
    /// Whether this execution is a concurrent branch.
    pub is_concurrent: bool,
    /// Parked execution hosting event subscriptions only.
    pub is_event_scope: bool,
    /// Root execution of a multi-instance activity.
    pub is_multi_instance_root: bool,
    /// Suspension state.
    pub suspension_state: SuspensionState,
    /// Business key of the process instance.
    pub business_key: Option<String>,
    /// Tenant id.
    pub tenant_id: Option<String>,
    /// When the execution was created.
    pub start_time: DateTime<Utc>,
    /// User that started the process instance.
    pub start_user_id: Option<String>,
    /// Activity the process instance was started at.
    pub start_activity_id: Option<String>,
    /// Callback reference handed in by an embedding engine.
    pub callback_id: Option<String>,
    /// Callback reference type.
    pub callback_type: Option<String>,
    /// Cross-engine child reference (e.g. a case instance).
    pub reference_id: Option<String>,
    /// Cross-engine child reference type.
    pub reference_type: Option<String>,
    /// Stage-instance id propagated from an embedding case engine.
    pub propagated_stage_instance_id: Option<String>,
    /// Exclusive-execution lock expiry.
    pub lock_time: Option<DateTime<Utc>>,
    /// Exclusive-execution lock owner.
    pub lock_owner: Option<String>,
    /// Why the execution was deleted, if it was.
    pub delete_reason: Option<String>,
    /// Whether related-entity counting is trusted for this execution.
    /// Inherited at creation; never re-enabled once disabled.
    pub count_enabled: bool,
    /// Persisted related-entity base counts.
    pub counts: EntityCounts,
    /// In-command count adjustments, reconciled into `counts` at flush.
    pub count_deltas: CountDeltas,
    /// Child execution ids, once loaded.
    pub children: Lazy<Vec<String>>,
    /// Local variable-instance ids, once loaded.
    pub variable_ids: Lazy<Vec<String>>,
    /// Variables touched by this command, name to variable-instance id.
    /// A write to a name in this map always updates that instance.
    pub used_variables: HashMap<String, String>,
    is_deleted: bool,
}

impl ExecutionEntity {
    /// Create an execution with the given id. All relationship state
    /// starts unloaded; flags start false.
    pub fn new(id: impl Into<String>, process_definition_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            process_instance_id: id.clone(),
            root_process_instance_id: id.clone(),
            id,
            revision: 1,
            process_definition_id: process_definition_id.into(),
            process_definition_key: None,
            parent_id: None,
            super_execution_id: None,
            sub_process_instance_id: None,
            current_activity_id: None,
            is_active: true,
            is_ended: false,
            is_scope: false,
            is_concurrent: false,
            is_event_scope: false,
            is_multi_instance_root: false,
            suspension_state: SuspensionState::Active,
            business_key: None,
            tenant_id: None,
            start_time: Utc::now(),
            start_user_id: None,
            start_activity_id: None,
            callback_id: None,
            callback_type: None,
            reference_id: None,
            reference_type: None,
            propagated_stage_instance_id: None,
            lock_time: None,
            lock_owner: None,
            delete_reason: None,
            count_enabled: false,
            counts: EntityCounts::default(),
            count_deltas: CountDeltas::default(),
            children: Lazy::Unloaded,
            variable_ids: Lazy::Unloaded,
            used_variables: HashMap::new(),
            is_deleted: false,
        }
    }

    /// Whether this execution is a process-instance root.
    pub fn is_process_instance(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this execution is the root of its call-activity chain.
    pub fn is_root_process_instance(&self) -> bool {
        self.id == self.root_process_instance_id
    }

    /// Whether the execution has been deleted. Monotonic.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// Mark the execution deleted. There is no way back.
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }

    /// Effective event-subscription count (base + delta).
    pub fn event_subscription_count(&self) -> i32 {
        self.counts.event_subscriptions + self.count_deltas.event_subscriptions()
    }

    /// Effective task count (base + delta).
    pub fn task_count(&self) -> i32 {
        self.counts.tasks + self.count_deltas.tasks()
    }

    /// Effective count for one job kind (base + that kind's own delta).
    pub fn job_count(&self, kind: JobKind) -> i32 {
        let base = match kind {
            JobKind::Message => self.counts.jobs,
            JobKind::Timer => self.counts.timer_jobs,
            JobKind::Suspended => self.counts.suspended_jobs,
            JobKind::DeadLetter => self.counts.dead_letter_jobs,
            JobKind::ExternalWorker => self.counts.external_worker_jobs,
        };
        base + self.count_deltas.jobs(kind)
    }

    /// Effective variable count (base + delta).
    pub fn variable_count(&self) -> i32 {
        self.counts.variables + self.count_deltas.variables()
    }

    /// Effective identity-link count (base + delta).
    pub fn identity_link_count(&self) -> i32 {
        self.counts.identity_links + self.count_deltas.identity_links()
    }

    /// Fold accumulated deltas into the persisted base counts.
    /// Returns true when anything changed. Called at flush.
    pub fn reconcile_counts(&mut self) -> bool {
        if !self.count_deltas.is_dirty() {
            return false;
        }
        self.counts.event_subscriptions += self.count_deltas.event_subscriptions();
        self.counts.tasks += self.count_deltas.tasks();
        self.counts.jobs += self.count_deltas.jobs(JobKind::Message);
        self.counts.timer_jobs += self.count_deltas.jobs(JobKind::Timer);
        self.counts.suspended_jobs += self.count_deltas.jobs(JobKind::Suspended);
        self.counts.dead_letter_jobs += self.count_deltas.jobs(JobKind::DeadLetter);
        self.counts.external_worker_jobs += self.count_deltas.jobs(JobKind::ExternalWorker);
        self.counts.variables += self.count_deltas.variables();
        self.counts.identity_links += self.count_deltas.identity_links();
        self.count_deltas = CountDeltas::default();
        true
    }

    /// Register a child id in the loaded children collection, replacing
    /// any existing entry with the same id. No-op while unloaded.
    pub fn register_child(&mut self, child_id: &str) {
        if let Some(children) = self.children.get_mut() {
            children.retain(|id| id != child_id);
            children.push(child_id.to_string());
        }
    }

    /// Remove a child id from the loaded children collection.
    pub fn unregister_child(&mut self, child_id: &str) {
        if let Some(children) = self.children.get_mut() {
            children.retain(|id| id != child_id);
        }
    }
}

impl Entity for ExecutionEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Revisioned for ExecutionEntity {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_execution_is_its_own_process_instance() {
        let execution = ExecutionEntity::new("e1", "def:1");
        assert_eq!(execution.process_instance_id, "e1");
        assert_eq!(execution.root_process_instance_id, "e1");
        assert!(execution.is_process_instance());
        assert!(execution.is_root_process_instance());
    }

    #[test]
    fn test_job_and_timer_deltas_are_independent() {
        let mut execution = ExecutionEntity::new("e1", "def:1");
        execution.counts.jobs = 2;
        execution.count_deltas.add_jobs(JobKind::Timer, 3);

        // A timer delta must never leak into the async-job count.
        assert_eq!(execution.job_count(JobKind::Message), 2);
        assert_eq!(execution.job_count(JobKind::Timer), 3);
    }

    #[test]
    fn test_reconcile_folds_deltas_into_base() {
        let mut execution = ExecutionEntity::new("e1", "def:1");
        execution.count_deltas.add_jobs(JobKind::Message, 5);
        execution.count_deltas.add_jobs(JobKind::Message, -5);
        execution.count_deltas.add_variables(2);

        assert!(execution.reconcile_counts());
        assert_eq!(execution.counts.jobs, 0);
        assert_eq!(execution.counts.variables, 2);
        assert!(!execution.count_deltas.is_dirty());
        assert!(!execution.reconcile_counts());
    }

    #[test]
    fn test_register_child_replaces_same_id() {
        let mut execution = ExecutionEntity::new("e1", "def:1");
        execution.children.set(vec!["c1".to_string()]);
        execution.register_child("c1");
        execution.register_child("c2");
        assert_eq!(
            execution.children.get().map(|c| c.len()),
            Some(2),
            "re-registering must not duplicate"
        );
    }

    #[test]
    fn test_deleted_is_monotonic() {
        let mut execution = ExecutionEntity::new("e1", "def:1");
        assert!(!execution.is_deleted());
        execution.mark_deleted();
        assert!(execution.is_deleted());
        // No API exists to clear the flag.
    }
}
