// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hierarchical variable scope resolution.
//!
//! Variables resolve against a scope chain: task to its execution,
//! execution to its parent executions, ending at the process instance.
//! Writes prefer the scope that already owns the name; a name touched
//! earlier in the same command is always written through to that same
//! instance, whatever the hierarchy says ("last write in this unit of
//! work wins").

use async_recursion::async_recursion;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::context::CommandContext;
use crate::entities::{ByteArrayEntity, TaskEntity, VariableInstanceEntity};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::history::HistoryManager;
use crate::store::RuntimeStore;

/// A variable scope: an execution or a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableScopeRef {
    /// Execution-scoped.
    Execution(String),
    /// Task-local.
    Task(String),
}

impl VariableScopeRef {
    /// An execution scope.
    pub fn execution(id: impl Into<String>) -> Self {
        Self::Execution(id.into())
    }

    /// A task scope.
    pub fn task(id: impl Into<String>) -> Self {
        Self::Task(id.into())
    }

    /// The owning entity's id.
    pub fn id(&self) -> &str {
        match self {
            Self::Execution(id) | Self::Task(id) => id,
        }
    }
}

/// Read a variable, walking the scope chain upwards.
pub async fn get_variable(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Result<Option<Value>> {
    let mut current = Some(scope.clone());
    while let Some(scope) = current {
        if let Some(variable_id) = find_local(ctx, &scope, name).await? {
            return resolve_value(ctx, &variable_id).await;
        }
        current = parent_scope(ctx, &scope).await?;
    }
    Ok(None)
}

/// Read a variable from this scope only.
pub async fn get_variable_local(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Result<Option<Value>> {
    match find_local(ctx, scope, name).await? {
        Some(variable_id) => resolve_value(ctx, &variable_id).await,
        None => Ok(None),
    }
}

/// All variables visible from a scope, nearer scopes shadowing farther
/// ones.
pub async fn get_variables(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
) -> Result<HashMap<String, Value>> {
    let mut chain = Vec::new();
    let mut current = Some(scope.clone());
    while let Some(scope) = current {
        current = parent_scope(ctx, &scope).await?;
        chain.push(scope);
    }

    let mut merged = HashMap::new();
    for scope in chain.iter().rev() {
        let ids = ensure_variables_loaded(ctx, scope).await?;
        for variable_id in ids {
            let Some(variable) = ctx.cache.variables.get(&variable_id) else {
                continue;
            };
            let name = variable.name.clone();
            if let Some(value) = resolve_value(ctx, &variable_id).await? {
                merged.insert(name, value);
            }
        }
    }
    Ok(merged)
}

/// Write a variable along the scope chain.
///
/// A name already touched by this command is updated in place. With
/// `fetch_all_variables` the chain is resolved through fully-loaded
/// local collections; without it, each scope tries its cache, then one
/// name-specific store query, before delegating upward. Either way an
/// unknown name ends up created at the topmost scope of the chain.
pub async fn set_variable(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
    value: Value,
    fetch_all_variables: bool,
) -> Result<()> {
    if let Some(variable_id) = used_variable_id(ctx, scope, name).await? {
        let source = source_execution_id(ctx, scope).await?;
        return update_variable_instance(ctx, &variable_id, value, source).await;
    }

    let source = source_execution_id(ctx, scope).await?;
    if fetch_all_variables {
        set_variable_fetch_all(ctx, scope, name, value, source).await
    } else {
        set_variable_lazy(ctx, scope, name, value, source).await
    }
}

/// Write a variable on this scope, creating it when absent.
pub async fn set_variable_local(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
    value: Value,
) -> Result<()> {
    let source = source_execution_id(ctx, scope).await?;
    match find_local(ctx, scope, name).await? {
        Some(variable_id) => update_variable_instance(ctx, &variable_id, value, source).await,
        None => create_variable_instance(ctx, scope, name, value, source)
            .await
            .map(|_| ()),
    }
}

/// Create a variable on this scope. Fails when the name already exists
/// locally; callers wanting overwrite semantics use the update path.
pub async fn create_variable_local(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
    value: Value,
) -> Result<String> {
    if find_local(ctx, scope, name).await?.is_some() {
        return Err(EngineError::DuplicateVariable {
            name: name.to_string(),
            scope_id: scope.id().to_string(),
        });
    }
    let source = source_execution_id(ctx, scope).await?;
    create_variable_instance(ctx, scope, name, value, source).await
}

/// Remove a variable, walking the scope chain to the owner.
pub async fn remove_variable(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Result<()> {
    let mut current = Some(scope.clone());
    while let Some(scope) = current {
        if let Some(variable_id) = find_local(ctx, &scope, name).await? {
            return delete_variable_instance(ctx, &variable_id).await;
        }
        current = parent_scope(ctx, &scope).await?;
    }
    Ok(())
}

/// Remove a variable from this scope only.
pub async fn remove_variable_local(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Result<()> {
    if let Some(variable_id) = find_local(ctx, scope, name).await? {
        return delete_variable_instance(ctx, &variable_id).await;
    }
    Ok(())
}

// ============================================================================
// Write algorithm internals
// ============================================================================

#[async_recursion]
async fn set_variable_fetch_all(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
    value: Value,
    source_execution_id: Option<String>,
) -> Result<()> {
    if let Some(variable_id) = find_local(ctx, scope, name).await? {
        return update_variable_instance(ctx, &variable_id, value, source_execution_id).await;
    }
    if let Some(parent) = parent_scope(ctx, scope).await? {
        // New definitions live as high as existing ones would.
        return set_variable_fetch_all(ctx, &parent, name, value, source_execution_id).await;
    }
    create_variable_instance(ctx, scope, name, value, source_execution_id)
        .await
        .map(|_| ())
}

#[async_recursion]
async fn set_variable_lazy(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
    value: Value,
    source_execution_id: Option<String>,
) -> Result<()> {
    if let Some(variable_id) = find_cached_local(ctx, scope, name) {
        return update_variable_instance(ctx, &variable_id, value, source_execution_id).await;
    }

    let stored = match scope {
        VariableScopeRef::Execution(id) => {
            ctx.runtime()
                .store()
                .find_variable_by_execution_and_name(id, name)
                .await?
        }
        VariableScopeRef::Task(id) => {
            ctx.runtime()
                .store()
                .find_variable_by_task_and_name(id, name)
                .await?
        }
    };
    if let Some(variable) = stored {
        let variable_id = variable.id.clone();
        ctx.cache
            .variables
            .entry(variable_id.clone())
            .or_insert(variable);
        return update_variable_instance(ctx, &variable_id, value, source_execution_id).await;
    }

    if let Some(parent) = parent_scope(ctx, scope).await? {
        return set_variable_lazy(ctx, &parent, name, value, source_execution_id).await;
    }
    create_variable_instance(ctx, scope, name, value, source_execution_id)
        .await
        .map(|_| ())
}

async fn update_variable_instance(
    ctx: &mut CommandContext,
    variable_id: &str,
    value: Value,
    source_execution_id: Option<String>,
) -> Result<()> {
    let snapshot = match ctx.find_variable(variable_id).await? {
        Some(variable) => variable.clone(),
        None => {
            return Err(EngineError::NotFound {
                kind: "variable instance",
                id: variable_id.to_string(),
            });
        }
    };

    let spill = VariableInstanceEntity::needs_byte_array(&value);
    let store = ctx.runtime().store();
    let mut byte_array_id = None;
    if spill {
        if let Some(old) = &snapshot.byte_array_id {
            store.delete_byte_array(old).await?;
        }
        let byte_array = ByteArrayEntity {
            id: ctx.next_id(),
            name: Some(snapshot.name.clone()),
            bytes: serde_json::to_vec(&value)?,
        };
        store.insert_byte_array(&byte_array).await?;
        byte_array_id = Some(byte_array.id);
    } else if let Some(old) = &snapshot.byte_array_id {
        store.delete_byte_array(old).await?;
    }

    {
        let variable = ctx.variable_mut(variable_id).await?;
        variable.value = if spill { Value::Null } else { value };
        variable.byte_array_id = byte_array_id;
    }
    let updated = ctx
        .find_variable(variable_id)
        .await?
        .expect("updated above")
        .clone();
    mark_used(ctx, &updated);

    ctx.dispatch(EngineEvent::VariableUpdated {
        variable_id: variable_id.to_string(),
        name: updated.name.clone(),
    });
    if ctx.runtime().config().history_enabled {
        ctx.runtime().history.record_variable_update(&updated).await?;
        ctx.runtime()
            .history
            .record_historic_detail(&updated, source_execution_id.as_deref())
            .await?;
    }

    debug!(name = %updated.name, variable_id, "Variable updated");
    Ok(())
}

async fn create_variable_instance(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
    value: Value,
    source_execution_id: Option<String>,
) -> Result<String> {
    let id = ctx.next_id();
    let mut variable = VariableInstanceEntity::new(id.clone(), name);
    match scope {
        VariableScopeRef::Execution(execution_id) => {
            let execution = ctx.require_execution(execution_id, "execution").await?;
            variable.execution_id = Some(execution_id.clone());
            variable.process_instance_id = Some(execution.process_instance_id.clone());
            variable.tenant_id = execution.tenant_id.clone();
        }
        VariableScopeRef::Task(task_id) => {
            let task = require_task(ctx, task_id).await?;
            variable.task_id = Some(task_id.clone());
            variable.execution_id = task.execution_id.clone();
            variable.process_instance_id = task.process_instance_id.clone();
            variable.tenant_id = task.tenant_id.clone();
        }
    }

    if VariableInstanceEntity::needs_byte_array(&value) {
        let byte_array = ByteArrayEntity {
            id: ctx.next_id(),
            name: Some(name.to_string()),
            bytes: serde_json::to_vec(&value)?,
        };
        ctx.runtime().store().insert_byte_array(&byte_array).await?;
        variable.byte_array_id = Some(byte_array.id);
    } else {
        variable.value = value;
    }

    ctx.runtime().store().insert_variable(&variable).await?;
    ctx.cache.variables.insert(id.clone(), variable.clone());

    // Owner bookkeeping: loaded collection, used-variables cache, count.
    match scope {
        VariableScopeRef::Execution(execution_id) => {
            let counting_enabled = ctx
                .runtime()
                .config()
                .execution_related_entities_count_enabled;
            if let Some(execution) = ctx.cache.executions.get_mut(execution_id) {
                if let Some(ids) = execution.variable_ids.get_mut() {
                    ids.push(id.clone());
                }
                execution
                    .used_variables
                    .insert(name.to_string(), id.clone());
                if counting_enabled && execution.count_enabled {
                    execution.count_deltas.add_variables(1);
                }
            }
        }
        VariableScopeRef::Task(task_id) => {
            let counting_enabled = ctx.runtime().config().task_related_entities_count_enabled;
            if let Some(task) = ctx.cache.tasks.get_mut(task_id) {
                if let Some(ids) = task.variable_ids.get_mut() {
                    ids.push(id.clone());
                }
                task.used_variables.insert(name.to_string(), id.clone());
                if counting_enabled && task.count_enabled {
                    task.variable_count += 1;
                    ctx.cache.dirty_tasks.insert(task_id.clone());
                }
            }
        }
    }

    ctx.dispatch(EngineEvent::VariableCreated {
        variable_id: id.clone(),
        name: name.to_string(),
    });
    if ctx.runtime().config().history_enabled {
        ctx.runtime().history.record_variable_create(&variable).await?;
        ctx.runtime()
            .history
            .record_historic_detail(&variable, source_execution_id.as_deref())
            .await?;
    }

    debug!(name, variable_id = %id, scope_id = scope.id(), "Variable created");
    Ok(id)
}

async fn delete_variable_instance(ctx: &mut CommandContext, variable_id: &str) -> Result<()> {
    let snapshot = match ctx.find_variable(variable_id).await? {
        Some(variable) => variable.clone(),
        None => return Ok(()),
    };

    let store = ctx.runtime().store();
    if let Some(byte_array_id) = &snapshot.byte_array_id {
        store.delete_byte_array(byte_array_id).await?;
    }
    store.delete_variable(variable_id).await?;
    ctx.cache.variables.remove(variable_id);
    ctx.cache.dirty_variables.remove(variable_id);

    if let Some(task_id) = &snapshot.task_id {
        let counting_enabled = ctx.runtime().config().task_related_entities_count_enabled;
        if let Some(task) = ctx.cache.tasks.get_mut(task_id) {
            if let Some(ids) = task.variable_ids.get_mut() {
                ids.retain(|id| id != variable_id);
            }
            task.used_variables.remove(&snapshot.name);
            if counting_enabled && task.count_enabled && !task.is_deleted() {
                task.variable_count -= 1;
                ctx.cache.dirty_tasks.insert(task_id.clone());
            }
        }
    } else if let Some(execution_id) = &snapshot.execution_id {
        let counting_enabled = ctx
            .runtime()
            .config()
            .execution_related_entities_count_enabled;
        if let Some(execution) = ctx.cache.executions.get_mut(execution_id) {
            if let Some(ids) = execution.variable_ids.get_mut() {
                ids.retain(|id| id != variable_id);
            }
            execution.used_variables.remove(&snapshot.name);
            if counting_enabled && execution.count_enabled && !execution.is_deleted() {
                execution.count_deltas.add_variables(-1);
            }
        }
    }

    ctx.dispatch(EngineEvent::VariableDeleted {
        variable_id: variable_id.to_string(),
        name: snapshot.name.clone(),
    });
    if ctx.runtime().config().history_enabled {
        ctx.runtime()
            .history
            .record_variable_removed(&snapshot)
            .await?;
    }
    Ok(())
}

// ============================================================================
// Scope chain plumbing
// ============================================================================

async fn parent_scope(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
) -> Result<Option<VariableScopeRef>> {
    match scope {
        VariableScopeRef::Task(task_id) => {
            let task = require_task(ctx, task_id).await?;
            Ok(task.execution_id.clone().map(VariableScopeRef::Execution))
        }
        VariableScopeRef::Execution(execution_id) => {
            let execution = ctx.require_execution(execution_id, "execution").await?;
            Ok(execution.parent_id.clone().map(VariableScopeRef::Execution))
        }
    }
}

async fn require_task(ctx: &mut CommandContext, task_id: &str) -> Result<TaskEntity> {
    match ctx.find_task(task_id).await? {
        Some(task) => Ok(task.clone()),
        None => Err(EngineError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        }),
    }
}

async fn ensure_variables_loaded(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
) -> Result<Vec<String>> {
    match scope {
        VariableScopeRef::Execution(execution_id) => {
            let execution = ctx.require_execution(execution_id, "execution").await?;
            if let Some(ids) = execution.variable_ids.get() {
                return Ok(ids.clone());
            }
            let rows = ctx
                .runtime()
                .store()
                .find_variables_by_execution_id(execution_id)
                .await?;
            let mut ids = Vec::with_capacity(rows.len());
            for row in rows {
                ids.push(row.id.clone());
                ctx.cache.variables.entry(row.id.clone()).or_insert(row);
            }
            ctx.cache
                .executions
                .get_mut(execution_id)
                .expect("required above")
                .variable_ids
                .set(ids.clone());
            Ok(ids)
        }
        VariableScopeRef::Task(task_id) => {
            let task = require_task(ctx, task_id).await?;
            if let Some(ids) = task.variable_ids.get() {
                return Ok(ids.clone());
            }
            let rows = ctx
                .runtime()
                .store()
                .find_variables_by_task_id(task_id)
                .await?;
            let mut ids = Vec::with_capacity(rows.len());
            for row in rows {
                ids.push(row.id.clone());
                ctx.cache.variables.entry(row.id.clone()).or_insert(row);
            }
            ctx.cache
                .tasks
                .get_mut(task_id)
                .expect("required above")
                .variable_ids
                .set(ids.clone());
            Ok(ids)
        }
    }
}

async fn find_local(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Result<Option<String>> {
    let ids = ensure_variables_loaded(ctx, scope).await?;
    for variable_id in ids {
        if let Some(variable) = ctx.cache.variables.get(&variable_id)
            && variable.name == name
        {
            return Ok(Some(variable_id));
        }
    }
    Ok(None)
}

fn find_cached_local(
    ctx: &CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Option<String> {
    ctx.cache
        .variables
        .values()
        .find(|variable| variable.name == name && scope_owns(variable, scope))
        .map(|variable| variable.id.clone())
}

fn scope_owns(variable: &VariableInstanceEntity, scope: &VariableScopeRef) -> bool {
    match scope {
        VariableScopeRef::Task(task_id) => variable.task_id.as_deref() == Some(task_id),
        VariableScopeRef::Execution(execution_id) => {
            variable.task_id.is_none() && variable.execution_id.as_deref() == Some(execution_id)
        }
    }
}

async fn used_variable_id(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
    name: &str,
) -> Result<Option<String>> {
    match scope {
        VariableScopeRef::Execution(execution_id) => Ok(ctx
            .require_execution(execution_id, "execution")
            .await?
            .used_variables
            .get(name)
            .cloned()),
        VariableScopeRef::Task(task_id) => {
            let task = require_task(ctx, task_id).await?;
            Ok(task.used_variables.get(name).cloned())
        }
    }
}

fn mark_used(ctx: &mut CommandContext, variable: &VariableInstanceEntity) {
    if let Some(task_id) = &variable.task_id {
        if let Some(task) = ctx.cache.tasks.get_mut(task_id) {
            task.used_variables
                .insert(variable.name.clone(), variable.id.clone());
        }
    } else if let Some(execution_id) = &variable.execution_id {
        if let Some(execution) = ctx.cache.executions.get_mut(execution_id) {
            execution
                .used_variables
                .insert(variable.name.clone(), variable.id.clone());
        }
    }
}

async fn source_execution_id(
    ctx: &mut CommandContext,
    scope: &VariableScopeRef,
) -> Result<Option<String>> {
    match scope {
        VariableScopeRef::Execution(execution_id) => Ok(Some(execution_id.clone())),
        VariableScopeRef::Task(task_id) => {
            let task = require_task(ctx, task_id).await?;
            Ok(task.execution_id.clone())
        }
    }
}

async fn resolve_value(ctx: &mut CommandContext, variable_id: &str) -> Result<Option<Value>> {
    let snapshot = match ctx.find_variable(variable_id).await? {
        Some(variable) => variable.clone(),
        None => return Ok(None),
    };
    if let Some(byte_array_id) = &snapshot.byte_array_id {
        if let Some(byte_array) = ctx
            .runtime()
            .store()
            .find_byte_array_by_id(byte_array_id)
            .await?
        {
            return Ok(Some(serde_json::from_slice(&byte_array.bytes)?));
        }
    }
    Ok(Some(snapshot.value))
}
