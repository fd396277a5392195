// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instrumented store wrapper that counts operations on any backend.
//!
//! Follows the decorator pattern: wrap any [`RuntimeStore`] and every
//! call is tallied per method name before delegation. The counting
//! tests use this as a query spy to prove that zero-count gates really
//! skip the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::entities::{
    ActivityInstanceEntity, ByteArrayEntity, EntityLinkEntity, EventSubscriptionEntity,
    ExecutionEntity, IdentityLinkEntity, JobEntity, JobKind, TaskEntity, VariableInstanceEntity,
};
use crate::error::EngineError;

use super::RuntimeStore;

/// Wrapper that counts every store operation by method name.
pub struct InstrumentedStore {
    inner: Arc<dyn RuntimeStore>,
    operations: Mutex<HashMap<&'static str, u64>>,
}

impl InstrumentedStore {
    /// Wrap a store.
    pub fn new(inner: Arc<dyn RuntimeStore>) -> Self {
        Self {
            inner,
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `operation` was invoked.
    pub fn operation_count(&self, operation: &str) -> u64 {
        self.operations
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Total operations across all methods.
    pub fn total_operations(&self) -> u64 {
        self.operations.lock().unwrap().values().sum()
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.operations.lock().unwrap().clear();
    }

    fn record(&self, operation: &'static str) {
        *self.operations.lock().unwrap().entry(operation).or_insert(0) += 1;
    }
}

#[async_trait]
impl RuntimeStore for InstrumentedStore {
    async fn insert_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError> {
        self.record("insert_execution");
        self.inner.insert_execution(execution).await
    }

    async fn update_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError> {
        self.record("update_execution");
        self.inner.update_execution(execution).await
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        self.record("delete_execution");
        self.inner.delete_execution(execution_id).await
    }

    async fn find_execution_by_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError> {
        self.record("find_execution_by_id");
        self.inner.find_execution_by_id(execution_id).await
    }

    async fn find_child_executions_by_parent_execution_id(
        &self,
        parent_execution_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        self.record("find_child_executions_by_parent_execution_id");
        self.inner
            .find_child_executions_by_parent_execution_id(parent_execution_id)
            .await
    }

    async fn find_executions_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        self.record("find_executions_by_process_instance_id");
        self.inner
            .find_executions_by_process_instance_id(process_instance_id)
            .await
    }

    async fn find_executions_by_root_process_instance_id(
        &self,
        root_process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        self.record("find_executions_by_root_process_instance_id");
        self.inner
            .find_executions_by_root_process_instance_id(root_process_instance_id)
            .await
    }

    async fn find_sub_process_instance_by_super_execution_id(
        &self,
        super_execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError> {
        self.record("find_sub_process_instance_by_super_execution_id");
        self.inner
            .find_sub_process_instance_by_super_execution_id(super_execution_id)
            .await
    }

    async fn insert_task(&self, task: &TaskEntity) -> Result<(), EngineError> {
        self.record("insert_task");
        self.inner.insert_task(task).await
    }

    async fn update_task(&self, task: &TaskEntity) -> Result<(), EngineError> {
        self.record("update_task");
        self.inner.update_task(task).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), EngineError> {
        self.record("delete_task");
        self.inner.delete_task(task_id).await
    }

    async fn find_task_by_id(&self, task_id: &str) -> Result<Option<TaskEntity>, EngineError> {
        self.record("find_task_by_id");
        self.inner.find_task_by_id(task_id).await
    }

    async fn find_tasks_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError> {
        self.record("find_tasks_by_execution_id");
        self.inner.find_tasks_by_execution_id(execution_id).await
    }

    async fn find_tasks_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError> {
        self.record("find_tasks_by_process_instance_id");
        self.inner
            .find_tasks_by_process_instance_id(process_instance_id)
            .await
    }

    async fn insert_job(&self, job: &JobEntity) -> Result<(), EngineError> {
        self.record("insert_job");
        self.inner.insert_job(job).await
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), EngineError> {
        self.record("delete_job");
        self.inner.delete_job(job_id).await
    }

    async fn find_job_by_id(&self, job_id: &str) -> Result<Option<JobEntity>, EngineError> {
        self.record("find_job_by_id");
        self.inner.find_job_by_id(job_id).await
    }

    async fn find_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<Vec<JobEntity>, EngineError> {
        self.record("find_jobs_by_execution_id");
        self.inner.find_jobs_by_execution_id(kind, execution_id).await
    }

    async fn bulk_delete_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_jobs_by_execution_id");
        self.inner
            .bulk_delete_jobs_by_execution_id(kind, execution_id)
            .await
    }

    async fn insert_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError> {
        self.record("insert_variable");
        self.inner.insert_variable(variable).await
    }

    async fn update_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError> {
        self.record("update_variable");
        self.inner.update_variable(variable).await
    }

    async fn delete_variable(&self, variable_id: &str) -> Result<(), EngineError> {
        self.record("delete_variable");
        self.inner.delete_variable(variable_id).await
    }

    async fn find_variable_by_id(
        &self,
        variable_id: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        self.record("find_variable_by_id");
        self.inner.find_variable_by_id(variable_id).await
    }

    async fn find_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError> {
        self.record("find_variables_by_execution_id");
        self.inner.find_variables_by_execution_id(execution_id).await
    }

    async fn find_variables_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError> {
        self.record("find_variables_by_task_id");
        self.inner.find_variables_by_task_id(task_id).await
    }

    async fn find_variable_by_execution_and_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        self.record("find_variable_by_execution_and_name");
        self.inner
            .find_variable_by_execution_and_name(execution_id, name)
            .await
    }

    async fn find_variable_by_task_and_name(
        &self,
        task_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        self.record("find_variable_by_task_and_name");
        self.inner.find_variable_by_task_and_name(task_id, name).await
    }

    async fn bulk_delete_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_variables_by_execution_id");
        self.inner
            .bulk_delete_variables_by_execution_id(execution_id)
            .await
    }

    async fn insert_byte_array(&self, byte_array: &ByteArrayEntity) -> Result<(), EngineError> {
        self.record("insert_byte_array");
        self.inner.insert_byte_array(byte_array).await
    }

    async fn find_byte_array_by_id(
        &self,
        byte_array_id: &str,
    ) -> Result<Option<ByteArrayEntity>, EngineError> {
        self.record("find_byte_array_by_id");
        self.inner.find_byte_array_by_id(byte_array_id).await
    }

    async fn delete_byte_array(&self, byte_array_id: &str) -> Result<(), EngineError> {
        self.record("delete_byte_array");
        self.inner.delete_byte_array(byte_array_id).await
    }

    async fn insert_event_subscription(
        &self,
        subscription: &EventSubscriptionEntity,
    ) -> Result<(), EngineError> {
        self.record("insert_event_subscription");
        self.inner.insert_event_subscription(subscription).await
    }

    async fn find_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<EventSubscriptionEntity>, EngineError> {
        self.record("find_event_subscriptions_by_execution_id");
        self.inner
            .find_event_subscriptions_by_execution_id(execution_id)
            .await
    }

    async fn bulk_delete_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_event_subscriptions_by_execution_id");
        self.inner
            .bulk_delete_event_subscriptions_by_execution_id(execution_id)
            .await
    }

    async fn insert_identity_link(&self, link: &IdentityLinkEntity) -> Result<(), EngineError> {
        self.record("insert_identity_link");
        self.inner.insert_identity_link(link).await
    }

    async fn find_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError> {
        self.record("find_identity_links_by_task_id");
        self.inner.find_identity_links_by_task_id(task_id).await
    }

    async fn find_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError> {
        self.record("find_identity_links_by_process_instance_id");
        self.inner
            .find_identity_links_by_process_instance_id(process_instance_id)
            .await
    }

    async fn bulk_delete_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_identity_links_by_task_id");
        self.inner.bulk_delete_identity_links_by_task_id(task_id).await
    }

    async fn bulk_delete_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_identity_links_by_process_instance_id");
        self.inner
            .bulk_delete_identity_links_by_process_instance_id(process_instance_id)
            .await
    }

    async fn insert_entity_link(&self, link: &EntityLinkEntity) -> Result<(), EngineError> {
        self.record("insert_entity_link");
        self.inner.insert_entity_link(link).await
    }

    async fn find_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<Vec<EntityLinkEntity>, EngineError> {
        self.record("find_entity_links_by_root_scope_id");
        self.inner.find_entity_links_by_root_scope_id(root_scope_id).await
    }

    async fn bulk_delete_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_entity_links_by_root_scope_id");
        self.inner
            .bulk_delete_entity_links_by_root_scope_id(root_scope_id)
            .await
    }

    async fn insert_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError> {
        self.record("insert_activity_instance");
        self.inner.insert_activity_instance(activity).await
    }

    async fn update_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError> {
        self.record("update_activity_instance");
        self.inner.update_activity_instance(activity).await
    }

    async fn find_unfinished_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ActivityInstanceEntity>, EngineError> {
        self.record("find_unfinished_activity_instances_by_execution_id");
        self.inner
            .find_unfinished_activity_instances_by_execution_id(execution_id)
            .await
    }

    async fn bulk_delete_activity_instances_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_activity_instances_by_process_instance_id");
        self.inner
            .bulk_delete_activity_instances_by_process_instance_id(process_instance_id)
            .await
    }

    async fn bulk_delete_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.record("bulk_delete_activity_instances_by_execution_id");
        self.inner
            .bulk_delete_activity_instances_by_execution_id(execution_id)
            .await
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_operations_are_counted_per_method() {
        let store = InstrumentedStore::new(Arc::new(MemoryStore::new()));
        let execution = ExecutionEntity::new("e1", "def:1");

        store.insert_execution(&execution).await.unwrap();
        store.find_execution_by_id("e1").await.unwrap();
        store.find_execution_by_id("e2").await.unwrap();

        assert_eq!(store.operation_count("insert_execution"), 1);
        assert_eq!(store.operation_count("find_execution_by_id"), 2);
        assert_eq!(store.operation_count("delete_execution"), 0);
        assert_eq!(store.total_operations(), 3);

        store.reset();
        assert_eq!(store.total_operations(), 0);
    }
}
