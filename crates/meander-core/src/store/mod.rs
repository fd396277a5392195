// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store interfaces and backends for meander-core.
//!
//! One sectioned contract covers every runtime entity kind: point CRUD,
//! finders by foreign key, and the bulk deletes the cascade relies on.
//! Updates are optimistic: the caller bumps the revision and the store
//! rejects the write when the stored revision does not match the
//! previous one.

pub mod instrumented;
pub mod memory;
pub mod sqlite;

pub use self::instrumented::InstrumentedStore;
pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;

use crate::entities::{
    ActivityInstanceEntity, ByteArrayEntity, EntityLinkEntity, EventSubscriptionEntity,
    ExecutionEntity, IdentityLinkEntity, JobEntity, JobKind, TaskEntity, VariableInstanceEntity,
};
use crate::error::EngineError;

/// Store contract consumed by the command context and the tree manager.
#[allow(missing_docs)]
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    // ========================================================================
    // Executions
    // ========================================================================

    async fn insert_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError>;

    /// Revision-checked update. The entity carries the new revision;
    /// the stored row must still hold the previous one.
    async fn update_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError>;

    async fn delete_execution(&self, execution_id: &str) -> Result<(), EngineError>;

    async fn find_execution_by_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError>;

    async fn find_child_executions_by_parent_execution_id(
        &self,
        parent_execution_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError>;

    async fn find_executions_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError>;

    /// Every execution of a call-activity chain, in one query.
    async fn find_executions_by_root_process_instance_id(
        &self,
        root_process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError>;

    async fn find_sub_process_instance_by_super_execution_id(
        &self,
        super_execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError>;

    // ========================================================================
    // Tasks
    // ========================================================================

    async fn insert_task(&self, task: &TaskEntity) -> Result<(), EngineError>;

    async fn update_task(&self, task: &TaskEntity) -> Result<(), EngineError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), EngineError>;

    async fn find_task_by_id(&self, task_id: &str) -> Result<Option<TaskEntity>, EngineError>;

    async fn find_tasks_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError>;

    async fn find_tasks_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError>;

    // ========================================================================
    // Jobs
    // ========================================================================

    async fn insert_job(&self, job: &JobEntity) -> Result<(), EngineError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), EngineError>;

    async fn find_job_by_id(&self, job_id: &str) -> Result<Option<JobEntity>, EngineError>;

    async fn find_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<Vec<JobEntity>, EngineError>;

    async fn bulk_delete_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<(), EngineError>;

    // ========================================================================
    // Variables and byte arrays
    // ========================================================================

    async fn insert_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError>;

    async fn update_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError>;

    async fn delete_variable(&self, variable_id: &str) -> Result<(), EngineError>;

    async fn find_variable_by_id(
        &self,
        variable_id: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError>;

    /// Variables local to an execution (not task-scoped).
    async fn find_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError>;

    async fn find_variables_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError>;

    async fn find_variable_by_execution_and_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError>;

    async fn find_variable_by_task_and_name(
        &self,
        task_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError>;

    async fn bulk_delete_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError>;

    async fn insert_byte_array(&self, byte_array: &ByteArrayEntity) -> Result<(), EngineError>;

    async fn find_byte_array_by_id(
        &self,
        byte_array_id: &str,
    ) -> Result<Option<ByteArrayEntity>, EngineError>;

    async fn delete_byte_array(&self, byte_array_id: &str) -> Result<(), EngineError>;

    // ========================================================================
    // Event subscriptions
    // ========================================================================

    async fn insert_event_subscription(
        &self,
        subscription: &EventSubscriptionEntity,
    ) -> Result<(), EngineError>;

    async fn find_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<EventSubscriptionEntity>, EngineError>;

    async fn bulk_delete_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError>;

    // ========================================================================
    // Identity links
    // ========================================================================

    async fn insert_identity_link(&self, link: &IdentityLinkEntity) -> Result<(), EngineError>;

    async fn find_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError>;

    async fn find_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError>;

    async fn bulk_delete_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<(), EngineError>;

    async fn bulk_delete_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError>;

    // ========================================================================
    // Entity links
    // ========================================================================

    async fn insert_entity_link(&self, link: &EntityLinkEntity) -> Result<(), EngineError>;

    async fn find_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<Vec<EntityLinkEntity>, EngineError>;

    async fn bulk_delete_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<(), EngineError>;

    // ========================================================================
    // Activity instances
    // ========================================================================

    async fn insert_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError>;

    async fn update_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError>;

    async fn find_unfinished_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ActivityInstanceEntity>, EngineError>;

    async fn bulk_delete_activity_instances_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError>;

    async fn bulk_delete_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError>;

    // ========================================================================
    // Diagnostics (optional - default implementations no-op)
    // ========================================================================

    /// Whether the backing store is reachable.
    async fn health_check(&self) -> Result<bool, EngineError> {
        // Default: in-process stores are always healthy
        Ok(true)
    }
}
