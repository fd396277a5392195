// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity-instance recording glue.
//!
//! Mirrors execution transitions into runtime activity-instance rows
//! and forwards them to the history manager. Lookups go cache first so
//! one command never opens two records for the same
//! (execution, activity) pair.

use chrono::Utc;
use tracing::debug;

use crate::context::CommandContext;
use crate::entities::ActivityInstanceEntity;
use crate::error::Result;
use crate::history::HistoryManager;
use crate::model::FlowElement;
use crate::store::RuntimeStore;

/// Record that an execution entered its current flow element.
///
/// Only flow nodes produce records (a sequence-flow position is not an
/// activity); nothing happens when runtime activity recording is off or
/// an open record for the pair already exists.
pub async fn record_activity_start(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    if !ctx.runtime().config().record_runtime_activities {
        return Ok(());
    }
    let execution = ctx.require_execution(execution_id, "execution").await?.clone();
    let Some(activity_id) = execution.current_activity_id.clone() else {
        return Ok(());
    };
    let Some(element) = flow_element(ctx, &execution.process_definition_id, &activity_id) else {
        return Ok(());
    };
    if !element.is_flow_node() {
        return Ok(());
    }

    if find_activity_instance(ctx, execution_id, &activity_id)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let activity = ActivityInstanceEntity {
        id: ctx.next_id(),
        revision: 1,
        process_definition_id: execution.process_definition_id.clone(),
        process_instance_id: execution.process_instance_id.clone(),
        execution_id: execution_id.to_string(),
        activity_id: activity_id.clone(),
        activity_name: element.name.clone(),
        activity_type: element.activity_type(),
        assignee: None,
        task_id: None,
        start_time: Utc::now(),
        end_time: None,
        duration_ms: None,
        delete_reason: None,
        tenant_id: execution.tenant_id.clone(),
    };
    ctx.runtime().store().insert_activity_instance(&activity).await?;
    ctx.cache
        .activity_instances
        .insert(activity.id.clone(), activity.clone());

    if ctx.runtime().config().history_enabled {
        ctx.runtime().history.record_activity_start(&activity).await?;
    }

    debug!(execution_id, activity_id = %activity_id, "Activity started");
    Ok(())
}

/// Record that an execution left its current flow element, closing the
/// open record.
pub async fn record_activity_end(
    ctx: &mut CommandContext,
    execution_id: &str,
    delete_reason: Option<&str>,
) -> Result<()> {
    if !ctx.runtime().config().record_runtime_activities {
        return Ok(());
    }
    let Some(execution) = ctx.find_execution(execution_id).await? else {
        return Ok(());
    };
    let Some(activity_id) = execution.current_activity_id.clone() else {
        return Ok(());
    };

    let Some(instance_id) = find_activity_instance(ctx, execution_id, &activity_id).await? else {
        return Ok(());
    };

    let snapshot = {
        let activity = ctx
            .cache
            .activity_instances
            .get_mut(&instance_id)
            .expect("found above");
        activity.mark_ended(Utc::now(), delete_reason);
        ctx.cache.dirty_activity_instances.insert(instance_id.clone());
        activity.clone()
    };

    if ctx.runtime().config().history_enabled {
        ctx.runtime()
            .history
            .record_activity_end(&snapshot, delete_reason)
            .await?;
    }

    debug!(execution_id, activity_id = %activity_id, "Activity ended");
    Ok(())
}

/// Attach a freshly created task to the open activity record of its
/// execution.
pub async fn record_task_created(ctx: &mut CommandContext, task_id: &str) -> Result<()> {
    if !ctx.runtime().config().record_runtime_activities {
        return Ok(());
    }
    let Some(task) = ctx.find_task(task_id).await? else {
        return Ok(());
    };
    let task_snapshot = task.clone();
    let Some(execution_id) = task_snapshot.execution_id.clone() else {
        return Ok(());
    };
    let Some(execution) = ctx.find_execution(&execution_id).await? else {
        return Ok(());
    };
    let Some(activity_id) = execution.current_activity_id.clone() else {
        return Ok(());
    };

    if let Some(instance_id) = find_activity_instance(ctx, &execution_id, &activity_id).await? {
        let activity = ctx
            .cache
            .activity_instances
            .get_mut(&instance_id)
            .expect("found above");
        activity.task_id = Some(task_id.to_string());
        activity.assignee = task_snapshot.assignee.clone();
        ctx.cache.dirty_activity_instances.insert(instance_id);
    }
    Ok(())
}

/// Sync task metadata changes (assignee) into the open activity record.
pub async fn record_task_info_change(ctx: &mut CommandContext, task_id: &str) -> Result<()> {
    if !ctx.runtime().config().record_runtime_activities {
        return Ok(());
    }
    let Some(task) = ctx.find_task(task_id).await? else {
        return Ok(());
    };
    let assignee = task.assignee.clone();
    let Some(execution_id) = task.execution_id.clone() else {
        return Ok(());
    };
    let Some(execution) = ctx.find_execution(&execution_id).await? else {
        return Ok(());
    };
    let Some(activity_id) = execution.current_activity_id.clone() else {
        return Ok(());
    };

    if let Some(instance_id) = find_activity_instance(ctx, &execution_id, &activity_id).await? {
        let activity = ctx
            .cache
            .activity_instances
            .get_mut(&instance_id)
            .expect("found above");
        activity.assignee = assignee;
        ctx.cache.dirty_activity_instances.insert(instance_id);
    }
    Ok(())
}

/// Move a user task to another execution, dragging its open activity
/// records along.
pub async fn sync_user_task_execution(
    ctx: &mut CommandContext,
    task_id: &str,
    new_execution_id: &str,
) -> Result<()> {
    let old_execution_id = {
        let task = ctx.task_mut(task_id).await?;
        let old = task.execution_id.clone();
        task.execution_id = Some(new_execution_id.to_string());
        old
    };
    let Some(old_execution_id) = old_execution_id else {
        return Ok(());
    };

    // Load the open records of the old execution into the cache, then
    // repoint the ones belonging to this task.
    let rows = ctx
        .runtime()
        .store()
        .find_unfinished_activity_instances_by_execution_id(&old_execution_id)
        .await?;
    for row in rows {
        ctx.cache
            .activity_instances
            .entry(row.id.clone())
            .or_insert(row);
    }
    let matching: Vec<String> = ctx
        .cache
        .activity_instances
        .values()
        .filter(|a| a.task_id.as_deref() == Some(task_id) && a.end_time.is_none())
        .map(|a| a.id.clone())
        .collect();
    for instance_id in matching {
        let activity = ctx
            .cache
            .activity_instances
            .get_mut(&instance_id)
            .expect("collected above");
        activity.execution_id = new_execution_id.to_string();
        ctx.cache.dirty_activity_instances.insert(instance_id);
    }
    Ok(())
}

/// Find the open activity-instance record for an
/// (execution, activity) pair: cache first, then the store.
pub async fn find_activity_instance(
    ctx: &mut CommandContext,
    execution_id: &str,
    activity_id: &str,
) -> Result<Option<String>> {
    if let Some(found) = ctx
        .cache
        .activity_instances
        .values()
        .find(|a| {
            a.execution_id == execution_id && a.activity_id == activity_id && a.end_time.is_none()
        })
        .map(|a| a.id.clone())
    {
        return Ok(Some(found));
    }

    let rows = ctx
        .runtime()
        .store()
        .find_unfinished_activity_instances_by_execution_id(execution_id)
        .await?;
    let mut found = None;
    for row in rows {
        if found.is_none() && row.activity_id == activity_id {
            found = Some(row.id.clone());
        }
        ctx.cache
            .activity_instances
            .entry(row.id.clone())
            .or_insert(row);
    }
    Ok(found)
}

fn flow_element(
    ctx: &CommandContext,
    process_definition_id: &str,
    activity_id: &str,
) -> Option<FlowElement> {
    ctx.runtime()
        .definitions()
        .find(process_definition_id)
        .and_then(|definition| definition.find_flow_element(activity_id).cloned())
}
