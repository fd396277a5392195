// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The command context - one unit of work.
//!
//! All reads go through the per-command entity cache so a command sees
//! its own not-yet-flushed writes; all relationship loads are explicit
//! and fail fast once the context is closed. Inserts and deletes hit
//! the store eagerly (deletes must happen in cascade order), while
//! field updates are tracked as dirty and written once at flush with an
//! optimistic revision bump.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::entities::{
    ActivityInstanceEntity, ExecutionEntity, TaskEntity, VariableInstanceEntity,
};
use crate::engine::EngineRuntime;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventDispatcher};
use crate::store::RuntimeStore;

/// Per-command cache of loaded entities, keyed by id.
#[derive(Default)]
pub(crate) struct EntityCache {
    pub(crate) executions: HashMap<String, ExecutionEntity>,
    pub(crate) tasks: HashMap<String, TaskEntity>,
    pub(crate) variables: HashMap<String, VariableInstanceEntity>,
    pub(crate) activity_instances: HashMap<String, ActivityInstanceEntity>,
    pub(crate) dirty_executions: HashSet<String>,
    pub(crate) dirty_tasks: HashSet<String>,
    pub(crate) dirty_variables: HashSet<String>,
    pub(crate) dirty_activity_instances: HashSet<String>,
}

impl EntityCache {
    /// Drop cached variables owned by an execution (after a bulk delete).
    pub(crate) fn evict_variables_by_execution(&mut self, execution_id: &str) {
        self.variables
            .retain(|_, v| v.execution_id.as_deref() != Some(execution_id));
        let remaining: HashSet<String> = self.variables.keys().cloned().collect();
        self.dirty_variables.retain(|id| remaining.contains(id));
    }

    /// Drop cached activity instances of an execution (after a bulk delete).
    pub(crate) fn evict_activity_instances_by_execution(&mut self, execution_id: &str) {
        self.activity_instances
            .retain(|_, a| a.execution_id != execution_id);
        let remaining: HashSet<String> = self.activity_instances.keys().cloned().collect();
        self.dirty_activity_instances
            .retain(|id| remaining.contains(id));
    }

    /// Drop cached activity instances of a process instance.
    pub(crate) fn evict_activity_instances_by_process_instance(
        &mut self,
        process_instance_id: &str,
    ) {
        self.activity_instances
            .retain(|_, a| a.process_instance_id != process_instance_id);
        let remaining: HashSet<String> = self.activity_instances.keys().cloned().collect();
        self.dirty_activity_instances
            .retain(|id| remaining.contains(id));
    }
}

/// One unit of work against the engine.
///
/// A command context is single-writer: the tree walks and cascades of
/// one command run to completion on one logical thread, and conflicts
/// with concurrent commands surface as optimistic-lock failures at
/// flush.
pub struct CommandContext {
    pub(crate) runtime: Arc<EngineRuntime>,
    pub(crate) cache: EntityCache,
    open: bool,
}

impl CommandContext {
    /// Open a command context against a runtime.
    pub fn new(runtime: Arc<EngineRuntime>) -> Self {
        Self {
            runtime,
            cache: EntityCache::default(),
            open: true,
        }
    }

    /// The runtime this command runs against.
    pub fn runtime(&self) -> &Arc<EngineRuntime> {
        &self.runtime
    }

    /// Generate a fresh entity id.
    pub fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Whether the context still accepts work.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn ensure_open(&self, relation: &'static str) -> Result<()> {
        if !self.open {
            return Err(EngineError::LazyLoadOutsideCommand { relation });
        }
        Ok(())
    }

    /// Dispatch an event if the dispatcher is enabled.
    pub(crate) fn dispatch(&self, event: EngineEvent) {
        if self.runtime.dispatcher.is_enabled() {
            self.runtime.dispatcher.dispatch(event);
        }
    }

    /// Whether event dispatch is active for this command.
    pub(crate) fn events_enabled(&self) -> bool {
        self.runtime.dispatcher.is_enabled()
    }

    // ========================================================================
    // Executions
    // ========================================================================

    /// Find an execution, cache first. Deleted executions stay visible
    /// within the command that deleted them.
    pub async fn find_execution(&mut self, execution_id: &str) -> Result<Option<&ExecutionEntity>> {
        self.ensure_open("execution")?;
        if !self.cache.executions.contains_key(execution_id) {
            if let Some(loaded) = self.runtime.store.find_execution_by_id(execution_id).await? {
                self.cache.executions.insert(execution_id.to_string(), loaded);
            }
        }
        Ok(self.cache.executions.get(execution_id))
    }

    /// Find an execution or fail with a not-found condition.
    pub(crate) async fn require_execution(
        &mut self,
        execution_id: &str,
        kind: &'static str,
    ) -> Result<&ExecutionEntity> {
        self.find_execution(execution_id).await?;
        self.cache
            .executions
            .get(execution_id)
            .ok_or_else(|| EngineError::NotFound {
                kind,
                id: execution_id.to_string(),
            })
    }

    /// Mutable access to an execution, loading it if needed and marking
    /// it dirty for the flush.
    pub(crate) async fn execution_mut(
        &mut self,
        execution_id: &str,
        kind: &'static str,
    ) -> Result<&mut ExecutionEntity> {
        self.require_execution(execution_id, kind).await?;
        self.cache.dirty_executions.insert(execution_id.to_string());
        Ok(self
            .cache
            .executions
            .get_mut(execution_id)
            .expect("required above"))
    }

    /// Resolve an execution's children collection, loading it on first
    /// use. Returns the child ids.
    pub(crate) async fn ensure_children_loaded(
        &mut self,
        execution_id: &str,
    ) -> Result<Vec<String>> {
        self.ensure_open("child executions")?;
        let execution = self.require_execution(execution_id, "execution").await?;
        if let Some(ids) = execution.children.get() {
            return Ok(ids.clone());
        }

        let children = self
            .runtime
            .store
            .find_child_executions_by_parent_execution_id(execution_id)
            .await?;
        let mut ids = Vec::with_capacity(children.len());
        for child in children {
            ids.push(child.id.clone());
            // Prefer the cached (possibly mutated) entity over the row.
            self.cache.executions.entry(child.id.clone()).or_insert(child);
        }
        let execution = self
            .cache
            .executions
            .get_mut(execution_id)
            .expect("required above");
        execution.children.set(ids.clone());
        Ok(ids)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Find a task, cache first.
    pub async fn find_task(&mut self, task_id: &str) -> Result<Option<&TaskEntity>> {
        self.ensure_open("task")?;
        if !self.cache.tasks.contains_key(task_id) {
            if let Some(loaded) = self.runtime.store.find_task_by_id(task_id).await? {
                self.cache.tasks.insert(task_id.to_string(), loaded);
            }
        }
        Ok(self.cache.tasks.get(task_id))
    }

    /// Mutable access to a task, loading it if needed and marking it
    /// dirty for the flush.
    pub(crate) async fn task_mut(&mut self, task_id: &str) -> Result<&mut TaskEntity> {
        self.find_task(task_id).await?;
        if !self.cache.tasks.contains_key(task_id) {
            return Err(EngineError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            });
        }
        self.cache.dirty_tasks.insert(task_id.to_string());
        Ok(self.cache.tasks.get_mut(task_id).expect("checked above"))
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Find a variable instance by id, cache first.
    pub(crate) async fn find_variable(
        &mut self,
        variable_id: &str,
    ) -> Result<Option<&VariableInstanceEntity>> {
        self.ensure_open("variables")?;
        if !self.cache.variables.contains_key(variable_id) {
            if let Some(loaded) = self.runtime.store.find_variable_by_id(variable_id).await? {
                self.cache.variables.insert(variable_id.to_string(), loaded);
            }
        }
        Ok(self.cache.variables.get(variable_id))
    }

    /// Mutable access to a cached variable instance, marking it dirty.
    pub(crate) async fn variable_mut(
        &mut self,
        variable_id: &str,
    ) -> Result<&mut VariableInstanceEntity> {
        self.find_variable(variable_id).await?;
        if !self.cache.variables.contains_key(variable_id) {
            return Err(EngineError::NotFound {
                kind: "variable instance",
                id: variable_id.to_string(),
            });
        }
        self.cache.dirty_variables.insert(variable_id.to_string());
        Ok(self
            .cache
            .variables
            .get_mut(variable_id)
            .expect("checked above"))
    }

    // ========================================================================
    // Flush / close
    // ========================================================================

    /// Write dirty state back to the store: fold count deltas into base
    /// counts, bump revisions, and run revision-checked updates.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open("flush")?;

        let mut execution_updates = Vec::new();
        for (id, execution) in self.cache.executions.iter_mut() {
            if execution.is_deleted() {
                continue;
            }
            let counts_changed = execution.reconcile_counts();
            if counts_changed || self.cache.dirty_executions.contains(id) {
                execution.revision += 1;
                execution_updates.push(execution.clone());
            }
        }
        self.cache.dirty_executions.clear();
        for execution in &execution_updates {
            self.runtime.store.update_execution(execution).await?;
        }

        let dirty_tasks: Vec<String> = self.cache.dirty_tasks.drain().collect();
        let mut task_updates = Vec::new();
        for id in dirty_tasks {
            if let Some(task) = self.cache.tasks.get_mut(&id) {
                if task.is_deleted() {
                    continue;
                }
                task.revision += 1;
                task_updates.push(task.clone());
            }
        }
        for task in &task_updates {
            self.runtime.store.update_task(task).await?;
        }

        let dirty_variables: Vec<String> = self.cache.dirty_variables.drain().collect();
        let mut variable_updates = Vec::new();
        for id in dirty_variables {
            if let Some(variable) = self.cache.variables.get_mut(&id) {
                variable.revision += 1;
                variable_updates.push(variable.clone());
            }
        }
        for variable in &variable_updates {
            self.runtime.store.update_variable(variable).await?;
        }

        let dirty_activity_instances: Vec<String> =
            self.cache.dirty_activity_instances.drain().collect();
        let mut activity_updates = Vec::new();
        for id in dirty_activity_instances {
            if let Some(activity) = self.cache.activity_instances.get_mut(&id) {
                activity.revision += 1;
                activity_updates.push(activity.clone());
            }
        }
        for activity in &activity_updates {
            self.runtime.store.update_activity_instance(activity).await?;
        }

        Ok(())
    }

    /// Flush and close the context. Lazy loads fail afterwards.
    pub async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn runtime() -> Arc<EngineRuntime> {
        Arc::new(
            EngineRuntime::builder()
                .store(Arc::new(MemoryStore::new()))
                .build()
                .expect("runtime"),
        )
    }

    #[tokio::test]
    async fn test_lazy_load_fails_after_close() {
        let runtime = runtime();
        let mut ctx = CommandContext::new(runtime.clone());
        ctx.close().await.unwrap();

        let err = ctx.find_execution("e1").await.unwrap_err();
        assert_eq!(err.error_code(), "LAZY_LOAD_OUTSIDE_COMMAND");
    }

    #[tokio::test]
    async fn test_reads_see_unflushed_cache_state() {
        let runtime = runtime();
        let mut ctx = CommandContext::new(runtime.clone());

        let execution = ExecutionEntity::new("e1", "def:1");
        runtime.store.insert_execution(&execution).await.unwrap();

        ctx.execution_mut("e1", "execution")
            .await
            .unwrap()
            .business_key = Some("bk".to_string());

        // Not flushed yet, but visible through the cache.
        let cached = ctx.find_execution("e1").await.unwrap().unwrap();
        assert_eq!(cached.business_key.as_deref(), Some("bk"));

        // The store still has the old row until flush.
        let stored = runtime
            .store
            .find_execution_by_id("e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.business_key, None);

        ctx.flush().await.unwrap();
        let stored = runtime
            .store
            .find_execution_by_id("e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.business_key.as_deref(), Some("bk"));
        assert_eq!(stored.revision, 2);
    }
}
