// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User-task creation and the task-deletion collaborator the cascade
//! uses.

use tracing::{debug, instrument};

use crate::context::CommandContext;
use crate::counting::{
    is_execution_related_entity_count_enabled, is_task_related_entity_count_enabled,
};
use crate::entities::{IdentityLinkEntity, TaskEntity};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EntityKind};
use crate::history::HistoryManager;
use crate::recorder;
use crate::store::RuntimeStore;

/// Inputs for creating a user task.
#[derive(Debug, Clone, Default)]
pub struct TaskCreateParams {
    /// Display name.
    pub name: Option<String>,
    /// Task-definition key (the user-task element id).
    pub task_definition_key: Option<String>,
    /// Execution to attach the task to.
    pub execution_id: Option<String>,
    /// Initial assignee.
    pub assignee: Option<String>,
    /// Task owner.
    pub owner: Option<String>,
    /// Priority.
    pub priority: Option<i32>,
    /// Tenant id.
    pub tenant_id: Option<String>,
}

/// Create a user task, attach it to its execution, and record it.
#[instrument(skip(ctx, params))]
pub async fn create_task(ctx: &mut CommandContext, params: TaskCreateParams) -> Result<String> {
    let id = ctx.next_id();
    let mut task = TaskEntity::new(id.clone());
    task.name = params.name.clone();
    task.task_definition_key = params.task_definition_key.clone();
    task.assignee = params.assignee.clone();
    task.owner = params.owner.clone();
    task.tenant_id = params.tenant_id.clone();
    if let Some(priority) = params.priority {
        task.priority = priority;
    }
    task.count_enabled = ctx.runtime().config().task_related_entities_count_enabled;

    if let Some(execution_id) = &params.execution_id {
        let counting_config = ctx.runtime().config().clone();
        let execution = ctx.require_execution(execution_id, "execution").await?;
        task.execution_id = Some(execution_id.clone());
        task.process_instance_id = Some(execution.process_instance_id.clone());
        task.process_definition_id = Some(execution.process_definition_id.clone());
        if task.tenant_id.is_none() {
            task.tenant_id = execution.tenant_id.clone();
        }
        if is_execution_related_entity_count_enabled(&counting_config, execution) {
            execution.count_deltas.add_tasks(1);
        }
    }

    // Assignee gets an identity link up front.
    if let Some(assignee) = &params.assignee {
        let link = IdentityLinkEntity {
            id: ctx.next_id(),
            link_type: "assignee".to_string(),
            user_id: Some(assignee.clone()),
            group_id: None,
            task_id: Some(id.clone()),
            process_instance_id: None,
        };
        ctx.runtime().store().insert_identity_link(&link).await?;
        if is_task_related_entity_count_enabled(ctx.runtime().config(), &task) {
            task.identity_link_count += 1;
        }
    }

    ctx.runtime().store().insert_task(&task).await?;
    ctx.cache.tasks.insert(id.clone(), task.clone());

    if ctx.runtime().config().history_enabled {
        ctx.runtime().history.record_task_created(&task).await?;
    }
    recorder::record_task_created(ctx, &id).await?;

    ctx.dispatch(EngineEvent::EntityCreated {
        kind: EntityKind::Task,
        entity_id: id.clone(),
    });

    debug!(task_id = %id, "Task created");
    Ok(id)
}

/// Change a task's assignee, keeping the audit trail in sync.
pub async fn set_task_assignee(
    ctx: &mut CommandContext,
    task_id: &str,
    assignee: Option<&str>,
) -> Result<()> {
    {
        let task = ctx.task_mut(task_id).await?;
        task.assignee = assignee.map(str::to_string);
    }
    let task_snapshot = ctx
        .find_task(task_id)
        .await?
        .expect("loaded above")
        .clone();
    if ctx.runtime().config().history_enabled {
        ctx.runtime()
            .history
            .record_task_info_change(&task_snapshot)
            .await?;
    }
    recorder::record_task_info_change(ctx, task_id).await?;
    Ok(())
}

/// Delete one task (completion or cancellation path), including its
/// identity links and task-local variables, and adjust the owning
/// execution's task count.
pub async fn delete_task(
    ctx: &mut CommandContext,
    task_id: &str,
    delete_reason: Option<&str>,
) -> Result<()> {
    let exists = ctx.find_task(task_id).await?.is_some();
    if !exists {
        return Err(EngineError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        });
    }
    delete_task_row(ctx, task_id, delete_reason, false, true).await
}

/// Delete every task of one execution. Used by the per-execution
/// related-data teardown; the execution is going away, so its task
/// count is left alone.
pub(crate) async fn delete_tasks_for_execution(
    ctx: &mut CommandContext,
    execution_id: &str,
    delete_reason: Option<&str>,
    direct_delete_in_database: bool,
) -> Result<()> {
    let tasks = ctx
        .runtime()
        .store()
        .find_tasks_by_execution_id(execution_id)
        .await?;
    for task in tasks {
        delete_task_row(ctx, &task.id, delete_reason, direct_delete_in_database, false).await?;
    }
    Ok(())
}

/// Delete every task of one process instance. Used by the cascade.
pub(crate) async fn delete_tasks_by_process_instance_id(
    ctx: &mut CommandContext,
    process_instance_id: &str,
    delete_reason: Option<&str>,
    _delete_history: bool,
) -> Result<()> {
    let tasks = ctx
        .runtime()
        .store()
        .find_tasks_by_process_instance_id(process_instance_id)
        .await?;
    for task in tasks {
        delete_task_row(ctx, &task.id, delete_reason, false, false).await?;
    }
    Ok(())
}

async fn delete_task_row(
    ctx: &mut CommandContext,
    task_id: &str,
    delete_reason: Option<&str>,
    direct_delete_in_database: bool,
    adjust_execution_count: bool,
) -> Result<()> {
    let snapshot = match ctx.find_task(task_id).await? {
        Some(task) if !task.is_deleted() => task.clone(),
        _ => return Ok(()),
    };

    let counting = is_task_related_entity_count_enabled(ctx.runtime().config(), &snapshot);
    let events = ctx.events_enabled() && !direct_delete_in_database;
    let store = ctx.runtime().store();

    // Identity links on the task.
    if !counting || snapshot.identity_link_count > 0 {
        if events {
            for link in store.find_identity_links_by_task_id(task_id).await? {
                ctx.dispatch(EngineEvent::EntityDeleted {
                    kind: EntityKind::IdentityLink,
                    entity_id: link.id,
                });
            }
        }
        store.bulk_delete_identity_links_by_task_id(task_id).await?;
    }

    // Task-local variables, spilled values first.
    if !counting || snapshot.variable_count > 0 {
        let variables = store.find_variables_by_task_id(task_id).await?;
        for variable in &variables {
            if let Some(byte_array_id) = &variable.byte_array_id {
                store.delete_byte_array(byte_array_id).await?;
            }
            if events {
                ctx.dispatch(EngineEvent::VariableDeleted {
                    variable_id: variable.id.clone(),
                    name: variable.name.clone(),
                });
            }
            store.delete_variable(&variable.id).await?;
            ctx.cache.variables.remove(&variable.id);
            ctx.cache.dirty_variables.remove(&variable.id);
        }
    }

    store.delete_task(task_id).await?;
    if let Some(task) = ctx.cache.tasks.get_mut(task_id) {
        task.delete_reason = delete_reason.map(str::to_string);
        task.mark_deleted();
    }

    if events {
        ctx.dispatch(EngineEvent::EntityDeleted {
            kind: EntityKind::Task,
            entity_id: task_id.to_string(),
        });
    }
    if ctx.runtime().config().history_enabled {
        ctx.runtime()
            .history
            .record_task_ended(task_id, delete_reason)
            .await?;
    }

    if adjust_execution_count
        && let Some(execution_id) = snapshot.execution_id.clone()
    {
        let counting_enabled = ctx
            .runtime()
            .config()
            .execution_related_entities_count_enabled;
        if counting_enabled {
            if let Some(execution) = ctx.find_execution(&execution_id).await? {
                if execution.count_enabled && !execution.is_deleted() {
                    execution.count_deltas.add_tasks(-1);
                }
            }
        }
    }

    Ok(())
}
