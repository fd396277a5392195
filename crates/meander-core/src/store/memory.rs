// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store backend.
//!
//! Used by embedders that want an engine without a database, and by the
//! test suite. Unlike a plain map, this store enforces the same
//! referential constraints a relational schema would: an execution
//! cannot be deleted while rows still reference it, so a cascade that
//! deletes in the wrong order fails loudly instead of leaving orphans.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::entities::{
    ActivityInstanceEntity, ByteArrayEntity, EntityLinkEntity, EventSubscriptionEntity,
    ExecutionEntity, IdentityLinkEntity, JobEntity, JobKind, TaskEntity, VariableInstanceEntity,
};
use crate::error::EngineError;

use super::RuntimeStore;

#[derive(Default)]
struct Inner {
    executions: HashMap<String, ExecutionEntity>,
    tasks: HashMap<String, TaskEntity>,
    jobs: HashMap<String, JobEntity>,
    variables: HashMap<String, VariableInstanceEntity>,
    byte_arrays: HashMap<String, ByteArrayEntity>,
    subscriptions: HashMap<String, EventSubscriptionEntity>,
    identity_links: HashMap<String, IdentityLinkEntity>,
    entity_links: HashMap<String, EntityLinkEntity>,
    activity_instances: HashMap<String, ActivityInstanceEntity>,
}

impl Inner {
    /// The relational constraints a schema would enforce with foreign
    /// keys: nothing may still reference an execution being deleted.
    fn check_execution_referenced(&self, execution_id: &str) -> Result<(), EngineError> {
        let referenced_by = if self
            .executions
            .values()
            .any(|e| e.parent_id.as_deref() == Some(execution_id))
        {
            Some("child executions")
        } else if self
            .executions
            .values()
            .any(|e| e.super_execution_id.as_deref() == Some(execution_id))
        {
            Some("a sub process instance")
        } else if self
            .tasks
            .values()
            .any(|t| t.execution_id.as_deref() == Some(execution_id))
        {
            Some("tasks")
        } else if self
            .jobs
            .values()
            .any(|j| j.execution_id.as_deref() == Some(execution_id))
        {
            Some("jobs")
        } else if self
            .variables
            .values()
            .any(|v| v.execution_id.as_deref() == Some(execution_id))
        {
            Some("variables")
        } else if self
            .subscriptions
            .values()
            .any(|s| s.execution_id.as_deref() == Some(execution_id))
        {
            Some("event subscriptions")
        } else if self
            .identity_links
            .values()
            .any(|l| l.process_instance_id.as_deref() == Some(execution_id))
        {
            Some("identity links")
        } else {
            None
        };

        match referenced_by {
            Some(what) => Err(EngineError::Consistency {
                message: format!(
                    "cannot delete execution '{}': still referenced by {}",
                    execution_id, what
                ),
            }),
            None => Ok(()),
        }
    }
}

/// In-memory, referential-integrity-checking store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of execution rows currently stored. Test diagnostics.
    pub async fn execution_count(&self) -> usize {
        self.inner.lock().await.executions.len()
    }

    /// Number of task rows currently stored. Test diagnostics.
    pub async fn task_count(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    /// Number of job rows currently stored. Test diagnostics.
    pub async fn job_count(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    /// Number of variable rows currently stored. Test diagnostics.
    pub async fn variable_count(&self) -> usize {
        self.inner.lock().await.variables.len()
    }
}

fn duplicate(operation: &str, id: &str) -> EngineError {
    EngineError::Storage {
        operation: operation.to_string(),
        details: format!("duplicate id '{}'", id),
    }
}

fn check_revision(
    kind: &'static str,
    id: &str,
    stored_revision: i32,
    new_revision: i32,
) -> Result<(), EngineError> {
    if stored_revision != new_revision - 1 {
        return Err(EngineError::ConcurrencyConflict {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl RuntimeStore for MemoryStore {
    async fn insert_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.executions.contains_key(&execution.id) {
            return Err(duplicate("insert_execution", &execution.id));
        }
        inner
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .executions
            .get(&execution.id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "execution",
                id: execution.id.clone(),
            })?;
        check_revision("execution", &execution.id, stored.revision, execution.revision)?;
        inner
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if !inner.executions.contains_key(execution_id) {
            return Err(EngineError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            });
        }
        inner.check_execution_referenced(execution_id)?;
        inner.executions.remove(execution_id);
        Ok(())
    }

    async fn find_execution_by_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError> {
        Ok(self.inner.lock().await.executions.get(execution_id).cloned())
    }

    async fn find_child_executions_by_parent_execution_id(
        &self,
        parent_execution_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .values()
            .filter(|e| e.parent_id.as_deref() == Some(parent_execution_id))
            .cloned()
            .collect())
    }

    async fn find_executions_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .values()
            .filter(|e| e.process_instance_id == process_instance_id)
            .cloned()
            .collect())
    }

    async fn find_executions_by_root_process_instance_id(
        &self,
        root_process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .values()
            .filter(|e| e.root_process_instance_id == root_process_instance_id)
            .cloned()
            .collect())
    }

    async fn find_sub_process_instance_by_super_execution_id(
        &self,
        super_execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .executions
            .values()
            .find(|e| e.super_execution_id.as_deref() == Some(super_execution_id))
            .cloned())
    }

    async fn insert_task(&self, task: &TaskEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(duplicate("insert_task", &task.id));
        }
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &TaskEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let stored = inner.tasks.get(&task.id).ok_or_else(|| EngineError::NotFound {
            kind: "task",
            id: task.id.clone(),
        })?;
        check_revision("task", &task.id, stored.revision, task.revision)?;
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), EngineError> {
        self.inner.lock().await.tasks.remove(task_id);
        Ok(())
    }

    async fn find_task_by_id(&self, task_id: &str) -> Result<Option<TaskEntity>, EngineError> {
        Ok(self.inner.lock().await.tasks.get(task_id).cloned())
    }

    async fn find_tasks_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.execution_id.as_deref() == Some(execution_id))
            .cloned()
            .collect())
    }

    async fn find_tasks_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.process_instance_id.as_deref() == Some(process_instance_id))
            .cloned()
            .collect())
    }

    async fn insert_job(&self, job: &JobEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(duplicate("insert_job", &job.id));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), EngineError> {
        self.inner.lock().await.jobs.remove(job_id);
        Ok(())
    }

    async fn find_job_by_id(&self, job_id: &str) -> Result<Option<JobEntity>, EngineError> {
        Ok(self.inner.lock().await.jobs.get(job_id).cloned())
    }

    async fn find_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<Vec<JobEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .jobs
            .values()
            .filter(|j| j.kind == kind && j.execution_id.as_deref() == Some(execution_id))
            .cloned()
            .collect())
    }

    async fn bulk_delete_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .jobs
            .retain(|_, j| !(j.kind == kind && j.execution_id.as_deref() == Some(execution_id)));
        Ok(())
    }

    async fn insert_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.variables.contains_key(&variable.id) {
            return Err(duplicate("insert_variable", &variable.id));
        }
        inner.variables.insert(variable.id.clone(), variable.clone());
        Ok(())
    }

    async fn update_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .variables
            .get(&variable.id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "variable instance",
                id: variable.id.clone(),
            })?;
        check_revision("variable instance", &variable.id, stored.revision, variable.revision)?;
        inner.variables.insert(variable.id.clone(), variable.clone());
        Ok(())
    }

    async fn delete_variable(&self, variable_id: &str) -> Result<(), EngineError> {
        self.inner.lock().await.variables.remove(variable_id);
        Ok(())
    }

    async fn find_variable_by_id(
        &self,
        variable_id: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        Ok(self.inner.lock().await.variables.get(variable_id).cloned())
    }

    async fn find_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .variables
            .values()
            .filter(|v| v.execution_id.as_deref() == Some(execution_id) && v.task_id.is_none())
            .cloned()
            .collect())
    }

    async fn find_variables_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .variables
            .values()
            .filter(|v| v.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect())
    }

    async fn find_variable_by_execution_and_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .variables
            .values()
            .find(|v| {
                v.execution_id.as_deref() == Some(execution_id)
                    && v.task_id.is_none()
                    && v.name == name
            })
            .cloned())
    }

    async fn find_variable_by_task_and_name(
        &self,
        task_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .variables
            .values()
            .find(|v| v.task_id.as_deref() == Some(task_id) && v.name == name)
            .cloned())
    }

    async fn bulk_delete_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .variables
            .retain(|_, v| v.execution_id.as_deref() != Some(execution_id));
        Ok(())
    }

    async fn insert_byte_array(&self, byte_array: &ByteArrayEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.byte_arrays.contains_key(&byte_array.id) {
            return Err(duplicate("insert_byte_array", &byte_array.id));
        }
        inner
            .byte_arrays
            .insert(byte_array.id.clone(), byte_array.clone());
        Ok(())
    }

    async fn find_byte_array_by_id(
        &self,
        byte_array_id: &str,
    ) -> Result<Option<ByteArrayEntity>, EngineError> {
        Ok(self.inner.lock().await.byte_arrays.get(byte_array_id).cloned())
    }

    async fn delete_byte_array(&self, byte_array_id: &str) -> Result<(), EngineError> {
        self.inner.lock().await.byte_arrays.remove(byte_array_id);
        Ok(())
    }

    async fn insert_event_subscription(
        &self,
        subscription: &EventSubscriptionEntity,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.subscriptions.contains_key(&subscription.id) {
            return Err(duplicate("insert_event_subscription", &subscription.id));
        }
        inner
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn find_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<EventSubscriptionEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .subscriptions
            .values()
            .filter(|s| s.execution_id.as_deref() == Some(execution_id))
            .cloned()
            .collect())
    }

    async fn bulk_delete_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .subscriptions
            .retain(|_, s| s.execution_id.as_deref() != Some(execution_id));
        Ok(())
    }

    async fn insert_identity_link(&self, link: &IdentityLinkEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.identity_links.contains_key(&link.id) {
            return Err(duplicate("insert_identity_link", &link.id));
        }
        inner.identity_links.insert(link.id.clone(), link.clone());
        Ok(())
    }

    async fn find_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .identity_links
            .values()
            .filter(|l| l.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect())
    }

    async fn find_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .identity_links
            .values()
            .filter(|l| l.process_instance_id.as_deref() == Some(process_instance_id))
            .cloned()
            .collect())
    }

    async fn bulk_delete_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .identity_links
            .retain(|_, l| l.task_id.as_deref() != Some(task_id));
        Ok(())
    }

    async fn bulk_delete_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .identity_links
            .retain(|_, l| l.process_instance_id.as_deref() != Some(process_instance_id));
        Ok(())
    }

    async fn insert_entity_link(&self, link: &EntityLinkEntity) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.entity_links.contains_key(&link.id) {
            return Err(duplicate("insert_entity_link", &link.id));
        }
        inner.entity_links.insert(link.id.clone(), link.clone());
        Ok(())
    }

    async fn find_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<Vec<EntityLinkEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .entity_links
            .values()
            .filter(|l| l.root_scope_id == root_scope_id)
            .cloned()
            .collect())
    }

    async fn bulk_delete_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .entity_links
            .retain(|_, l| l.root_scope_id != root_scope_id);
        Ok(())
    }

    async fn insert_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.activity_instances.contains_key(&activity.id) {
            return Err(duplicate("insert_activity_instance", &activity.id));
        }
        inner
            .activity_instances
            .insert(activity.id.clone(), activity.clone());
        Ok(())
    }

    async fn update_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .activity_instances
            .get(&activity.id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "activity instance",
                id: activity.id.clone(),
            })?;
        check_revision("activity instance", &activity.id, stored.revision, activity.revision)?;
        inner
            .activity_instances
            .insert(activity.id.clone(), activity.clone());
        Ok(())
    }

    async fn find_unfinished_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ActivityInstanceEntity>, EngineError> {
        Ok(self
            .inner
            .lock()
            .await
            .activity_instances
            .values()
            .filter(|a| a.execution_id == execution_id && a.end_time.is_none())
            .cloned()
            .collect())
    }

    async fn bulk_delete_activity_instances_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .activity_instances
            .retain(|_, a| a.process_instance_id != process_instance_id);
        Ok(())
    }

    async fn bulk_delete_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        self.inner
            .lock()
            .await
            .activity_instances
            .retain(|_, a| a.execution_id != execution_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_rejects_stale_revision() {
        let store = MemoryStore::new();
        let mut execution = ExecutionEntity::new("e1", "def:1");
        store.insert_execution(&execution).await.unwrap();

        execution.revision = 2;
        store.update_execution(&execution).await.unwrap();

        // A second writer still holding revision 1 must be rejected.
        let mut stale = ExecutionEntity::new("e1", "def:1");
        stale.revision = 2;
        let err = store.update_execution(&stale).await.unwrap_err();
        assert_eq!(err.error_code(), "CONCURRENCY_CONFLICT");
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_delete_with_children_is_rejected() {
        let store = MemoryStore::new();
        let parent = ExecutionEntity::new("p1", "def:1");
        let mut child = ExecutionEntity::new("c1", "def:1");
        child.parent_id = Some("p1".to_string());
        child.process_instance_id = "p1".to_string();
        store.insert_execution(&parent).await.unwrap();
        store.insert_execution(&child).await.unwrap();

        let err = store.delete_execution("p1").await.unwrap_err();
        assert_eq!(err.error_code(), "CONSISTENCY_VIOLATION");

        store.delete_execution("c1").await.unwrap();
        store.delete_execution("p1").await.unwrap();
        assert_eq!(store.execution_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_with_remaining_tasks_is_rejected() {
        let store = MemoryStore::new();
        let execution = ExecutionEntity::new("e1", "def:1");
        store.insert_execution(&execution).await.unwrap();

        let mut task = TaskEntity::new("t1");
        task.execution_id = Some("e1".to_string());
        store.insert_task(&task).await.unwrap();

        let err = store.delete_execution("e1").await.unwrap_err();
        assert_eq!(err.error_code(), "CONSISTENCY_VIOLATION");

        store.delete_task("t1").await.unwrap();
        store.delete_execution("e1").await.unwrap();
    }
}
