// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution tree management.
//!
//! These operations create, relate, query and atomically tear down the
//! execution tree and everything it owns. Deletion and cancellation are
//! one code path distinguished by the `cancel` flag, which controls
//! which lifecycle events observers see.
//!
//! Cascade ordering is load-bearing: descendants are collected
//! ancestor-first with a fixed sibling order (start time ascending) and
//! deleted in reverse, so a store that enforces referential integrity
//! never sees an orphaned row.

use std::collections::{HashMap, HashSet};

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::behavior::{
    CaseInstanceService, InterruptibleActivityBehavior, ProcessInstanceLifecycleHook,
    SubProcessActivityBehavior,
};
use crate::context::CommandContext;
use crate::counting::is_execution_related_entity_count_enabled;
use crate::entities::{EventSubscriptionEntity, ExecutionEntity, JobKind, SuspensionState};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EntityKind};
use crate::history::HistoryManager;
use crate::store::RuntimeStore;
use crate::{recorder, scope, tasks};

/// Reference type marking an execution's cross-engine child as a case
/// instance.
pub const CASE_REFERENCE_TYPE: &str = "cmmn";

/// Inputs for starting a process instance.
#[derive(Debug, Clone, Default)]
pub struct ProcessInstanceStartParams {
    /// The definition to instantiate (required).
    pub process_definition_id: String,
    /// Use this id instead of generating one.
    pub predefined_process_instance_id: Option<String>,
    /// Business key.
    pub business_key: Option<String>,
    /// Callback reference handed in by an embedding engine.
    pub callback_id: Option<String>,
    /// Callback reference type.
    pub callback_type: Option<String>,
    /// Cross-engine child reference.
    pub reference_id: Option<String>,
    /// Cross-engine child reference type.
    pub reference_type: Option<String>,
    /// Stage-instance id propagated from an embedding case engine.
    pub propagated_stage_instance_id: Option<String>,
    /// Tenant id.
    pub tenant_id: Option<String>,
    /// Activity the instance starts at.
    pub start_activity_id: Option<String>,
    /// Authenticated user starting the instance.
    pub start_user_id: Option<String>,
    /// When set, the starting user is bound into this variable.
    pub initiator_variable_name: Option<String>,
}

impl ProcessInstanceStartParams {
    /// Start params for a definition, everything else defaulted.
    pub fn new(process_definition_id: impl Into<String>) -> Self {
        Self {
            process_definition_id: process_definition_id.into(),
            ..Self::default()
        }
    }
}

/// Create a process-instance root execution.
///
/// The new execution is its own process instance and its own root; it
/// owns a scope, inherits the engine-wide counting setting, and is
/// persisted before the created event fires.
#[instrument(skip(ctx, params), fields(process_definition_id = %params.process_definition_id))]
pub async fn create_process_instance_execution(
    ctx: &mut CommandContext,
    params: ProcessInstanceStartParams,
) -> Result<String> {
    if params.process_definition_id.is_empty() {
        return Err(EngineError::Validation {
            field: "process_definition_id",
            message: "is required".to_string(),
        });
    }

    let definition = ctx.runtime().definitions().find(&params.process_definition_id);

    let id = params
        .predefined_process_instance_id
        .clone()
        .unwrap_or_else(|| ctx.next_id());

    let mut execution = ExecutionEntity::new(id.clone(), params.process_definition_id.clone());
    execution.process_definition_key = definition.as_ref().map(|d| d.key.clone());
    execution.is_scope = true;
    execution.business_key = params.business_key.clone();
    execution.tenant_id = params
        .tenant_id
        .clone()
        .or_else(|| definition.as_ref().and_then(|d| d.tenant_id.clone()));
    execution.start_time = Utc::now();
    execution.start_user_id = params.start_user_id.clone();
    execution.start_activity_id = params.start_activity_id.clone();
    execution.callback_id = params.callback_id.clone();
    execution.callback_type = params.callback_type.clone();
    execution.reference_id = params.reference_id.clone();
    execution.reference_type = params.reference_type.clone();
    execution.propagated_stage_instance_id = params.propagated_stage_instance_id.clone();
    execution.count_enabled = ctx
        .runtime()
        .config()
        .execution_related_entities_count_enabled;
    // A fresh instance has no relations yet; collections start loaded.
    execution.children.set(Vec::new());
    execution.variable_ids.set(Vec::new());

    ctx.runtime().store().insert_execution(&execution).await?;
    ctx.cache.executions.insert(id.clone(), execution);

    if let (Some(variable_name), Some(user_id)) =
        (&params.initiator_variable_name, &params.start_user_id)
    {
        scope::create_variable_local(
            ctx,
            &scope::VariableScopeRef::execution(&id),
            variable_name,
            serde_json::Value::String(user_id.clone()),
        )
        .await?;
    }

    ctx.dispatch(EngineEvent::EntityCreated {
        kind: EntityKind::Execution,
        entity_id: id.clone(),
    });

    info!(process_instance_id = %id, "Process instance execution created");
    Ok(id)
}

/// Create a child execution under `parent_execution_id`.
///
/// The child inherits definition, process instance, tenant and the
/// counting flag from its parent, and replaces any same-id entry in the
/// parent's loaded children collection.
#[instrument(skip(ctx))]
pub async fn create_child_execution(
    ctx: &mut CommandContext,
    parent_execution_id: &str,
) -> Result<String> {
    let parent = ctx.require_execution(parent_execution_id, "execution").await?;
    let process_definition_id = parent.process_definition_id.clone();
    let process_definition_key = parent.process_definition_key.clone();
    let process_instance_id = parent.process_instance_id.clone();
    let root_process_instance_id = parent.root_process_instance_id.clone();
    let tenant_id = parent.tenant_id.clone();
    let count_enabled = parent.count_enabled;
    let propagated_stage_instance_id = parent.propagated_stage_instance_id.clone();

    let id = ctx.next_id();
    let mut child = ExecutionEntity::new(id.clone(), process_definition_id);
    child.process_definition_key = process_definition_key;
    child.process_instance_id = process_instance_id;
    child.root_process_instance_id = root_process_instance_id;
    child.parent_id = Some(parent_execution_id.to_string());
    child.tenant_id = tenant_id;
    child.count_enabled = count_enabled;
    child.propagated_stage_instance_id = propagated_stage_instance_id;
    child.is_scope = false;
    child.children.set(Vec::new());
    child.variable_ids.set(Vec::new());

    ctx.runtime().store().insert_execution(&child).await?;
    ctx.cache.executions.insert(id.clone(), child);

    if let Some(parent) = ctx.cache.executions.get_mut(parent_execution_id) {
        parent.register_child(&id);
    }

    ctx.dispatch(EngineEvent::EntityCreated {
        kind: EntityKind::Execution,
        entity_id: id.clone(),
    });
    ctx.dispatch(EngineEvent::EntityInitialized {
        kind: EntityKind::Execution,
        entity_id: id.clone(),
    });

    debug!(execution_id = %id, parent_execution_id, "Child execution created");
    Ok(id)
}

/// Create the root execution of a called process instance under a
/// call-activity execution.
///
/// The new instance inherits the caller's root process instance id and
/// is wired to the caller as a super/sub pair. Event subprocesses
/// available at start are resolved into event subscriptions.
#[instrument(skip(ctx))]
pub async fn create_subprocess_instance(
    ctx: &mut CommandContext,
    process_definition_id: &str,
    super_execution_id: &str,
    business_key: Option<&str>,
    start_activity_id: Option<&str>,
) -> Result<String> {
    let super_execution = ctx.require_execution(super_execution_id, "execution").await?;
    let root_process_instance_id = super_execution.root_process_instance_id.clone();
    let super_tenant_id = super_execution.tenant_id.clone();

    let definition = ctx.runtime().definitions().find(process_definition_id);

    let id = ctx.next_id();
    let mut sub = ExecutionEntity::new(id.clone(), process_definition_id);
    sub.process_definition_key = definition.as_ref().map(|d| d.key.clone());
    // The called instance joins the caller's chain, not its own.
    sub.root_process_instance_id = root_process_instance_id;
    sub.is_scope = true;
    sub.business_key = business_key.map(str::to_string);
    sub.start_activity_id = start_activity_id.map(str::to_string);
    sub.tenant_id = definition
        .as_ref()
        .and_then(|d| d.tenant_id.clone())
        .or(super_tenant_id);
    sub.super_execution_id = Some(super_execution_id.to_string());
    sub.count_enabled = ctx
        .runtime()
        .config()
        .execution_related_entities_count_enabled;
    sub.children.set(Vec::new());
    sub.variable_ids.set(Vec::new());

    ctx.runtime().store().insert_execution(&sub).await?;
    ctx.cache.executions.insert(id.clone(), sub);

    link_sub_process_instance(ctx, super_execution_id, &id).await?;

    // Event subprocesses reachable at instance start get their
    // subscriptions up front.
    if let Some(definition) = definition {
        let counting_enabled = ctx
            .runtime()
            .config()
            .execution_related_entities_count_enabled;
        for start in &definition.event_subprocess_starts {
            let mut subscription =
                EventSubscriptionEntity::new(ctx.next_id(), start.event_type.clone());
            subscription.event_name = start.event_name.clone();
            subscription.execution_id = Some(id.clone());
            subscription.process_instance_id = Some(id.clone());
            subscription.activity_id = Some(start.activity_id.clone());
            subscription.process_definition_id = Some(definition.id.clone());
            ctx.runtime()
                .store()
                .insert_event_subscription(&subscription)
                .await?;

            let execution = ctx.require_execution(&id, "execution").await?;
            if counting_enabled && execution.count_enabled {
                execution.count_deltas.add_event_subscriptions(1);
            }
        }
    }

    ctx.dispatch(EngineEvent::EntityCreated {
        kind: EntityKind::Execution,
        entity_id: id.clone(),
    });

    info!(sub_process_instance_id = %id, super_execution_id, "Sub process instance created");
    Ok(id)
}

/// Move an execution to another flow element. Process navigation in
/// the behavior layer drives this; the recorder picks the change up
/// through [`crate::recorder::record_activity_start`].
pub async fn set_current_activity(
    ctx: &mut CommandContext,
    execution_id: &str,
    activity_id: Option<&str>,
) -> Result<()> {
    let execution = ctx.execution_mut(execution_id, "execution").await?;
    execution.current_activity_id = activity_id.map(str::to_string);
    Ok(())
}

/// Wire a super execution and a sub process instance as mutual
/// inverses. Both sides are updated here, never independently.
pub(crate) async fn link_sub_process_instance(
    ctx: &mut CommandContext,
    super_execution_id: &str,
    sub_process_instance_id: &str,
) -> Result<()> {
    let sub = ctx.execution_mut(sub_process_instance_id, "execution").await?;
    sub.super_execution_id = Some(super_execution_id.to_string());
    let super_execution = ctx.execution_mut(super_execution_id, "execution").await?;
    super_execution.sub_process_instance_id = Some(sub_process_instance_id.to_string());
    Ok(())
}

/// Clear both sides of a super/sub pair.
pub(crate) async fn unlink_sub_process_instance(
    ctx: &mut CommandContext,
    super_execution_id: &str,
) -> Result<()> {
    let super_execution = ctx.execution_mut(super_execution_id, "execution").await?;
    let sub_id = super_execution.sub_process_instance_id.take();
    if let Some(sub_id) = sub_id
        && let Some(sub) = ctx.cache.executions.get_mut(&sub_id)
    {
        sub.super_execution_id = None;
        if !sub.is_deleted() {
            ctx.cache.dirty_executions.insert(sub_id);
        }
    }
    Ok(())
}

/// Load a whole call-activity chain by root id in one store query and
/// rebuild the in-memory tree: children collections, process-instance
/// pointers and super/sub links all wired, no lazy loads left.
///
/// Returns the root execution's id, or `None` when nothing matches.
#[instrument(skip(ctx))]
pub async fn find_by_root_process_instance_id(
    ctx: &mut CommandContext,
    root_process_instance_id: &str,
) -> Result<Option<String>> {
    ctx.ensure_open("execution tree")?;
    let rows = ctx
        .runtime()
        .store()
        .find_executions_by_root_process_instance_id(root_process_instance_id)
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let ids: Vec<String> = rows.iter().map(|e| e.id.clone()).collect();
    for row in rows {
        ctx.cache.executions.entry(row.id.clone()).or_insert(row);
    }

    // Relationship wiring by id lookup over the loaded map.
    let mut children_by_parent: HashMap<String, Vec<(DateTime<Utc>, String)>> = HashMap::new();
    let mut sub_by_super: HashMap<String, String> = HashMap::new();
    for id in &ids {
        let execution = &ctx.cache.executions[id];
        if let Some(parent_id) = &execution.parent_id {
            children_by_parent
                .entry(parent_id.clone())
                .or_default()
                .push((execution.start_time, execution.id.clone()));
        }
        if let Some(super_id) = &execution.super_execution_id {
            sub_by_super.insert(super_id.clone(), execution.id.clone());
        }
    }

    for id in &ids {
        let mut child_ids = children_by_parent.remove(id).unwrap_or_default();
        child_ids.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let sub_id = sub_by_super.get(id).cloned();
        let execution = ctx
            .cache
            .executions
            .get_mut(id)
            .expect("loaded above");
        execution
            .children
            .set(child_ids.into_iter().map(|(_, id)| id).collect());
        if let Some(sub_id) = sub_id {
            execution.sub_process_instance_id = Some(sub_id);
        }
    }

    if ctx.cache.executions.contains_key(root_process_instance_id) {
        Ok(Some(root_process_instance_id.to_string()))
    } else {
        Ok(None)
    }
}

/// Walk up from an execution (via parent, falling back to the super
/// execution at a process-instance boundary) to the first scope.
pub async fn find_first_scope(
    ctx: &mut CommandContext,
    execution_id: &str,
) -> Result<Option<String>> {
    find_first_matching(ctx, execution_id, |e| e.is_scope).await
}

/// Walk up from an execution to the first multi-instance root.
pub async fn find_first_multi_instance_root(
    ctx: &mut CommandContext,
    execution_id: &str,
) -> Result<Option<String>> {
    find_first_matching(ctx, execution_id, |e| e.is_multi_instance_root).await
}

async fn find_first_matching(
    ctx: &mut CommandContext,
    execution_id: &str,
    predicate: fn(&ExecutionEntity) -> bool,
) -> Result<Option<String>> {
    let mut current = Some(execution_id.to_string());
    while let Some(id) = current {
        let Some(execution) = ctx.find_execution(&id).await? else {
            return Ok(None);
        };
        if predicate(execution) {
            return Ok(Some(id));
        }
        current = execution
            .parent_id
            .clone()
            .or_else(|| execution.super_execution_id.clone());
    }
    Ok(None)
}

/// Collect every descendant of an execution, depth-first and
/// ancestor-before-descendant, siblings ordered by start time
/// ascending, each execution's own sub process instance (and its
/// descendants) after its children. Deleted and excluded executions are
/// skipped. Reversing the result is a safe deletion order.
pub async fn collect_children(
    ctx: &mut CommandContext,
    execution_id: &str,
    exclude_ids: &HashSet<String>,
) -> Result<Vec<String>> {
    let mut collected = Vec::new();
    // Worklist pre-order: pop a node, record it, push its successors
    // in reverse so the first successor is processed next.
    let mut stack = successors(ctx, execution_id, exclude_ids).await?;
    stack.reverse();
    while let Some(id) = stack.pop() {
        collected.push(id.clone());
        let mut next = successors(ctx, &id, exclude_ids).await?;
        next.reverse();
        stack.append(&mut next);
    }
    Ok(collected)
}

async fn successors(
    ctx: &mut CommandContext,
    execution_id: &str,
    exclude_ids: &HashSet<String>,
) -> Result<Vec<String>> {
    let child_ids = ctx.ensure_children_loaded(execution_id).await?;
    let mut ordered: Vec<(DateTime<Utc>, String)> = Vec::new();
    for child_id in child_ids {
        if exclude_ids.contains(&child_id) {
            continue;
        }
        let Some(child) = ctx.find_execution(&child_id).await? else {
            continue;
        };
        if child.is_deleted() {
            continue;
        }
        ordered.push((child.start_time, child_id));
    }
    // Fixed sibling ordering; event order during deletion depends on it.
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let mut result: Vec<String> = ordered.into_iter().map(|(_, id)| id).collect();

    let sub_id = ctx
        .require_execution(execution_id, "execution")
        .await?
        .sub_process_instance_id
        .clone();
    if let Some(sub_id) = sub_id
        && !exclude_ids.contains(&sub_id)
    {
        let alive = sub_instance_alive(ctx, &sub_id).await?;
        if alive {
            result.push(sub_id);
        }
    }
    Ok(result)
}

/// Delete a process instance and everything it owns.
///
/// Fails with a not-found condition when the instance does not exist.
/// When the instance is the child of a call activity, the caller's
/// sub-process behavior is completed afterwards so the calling
/// execution resumes; a failure there aborts the command as a
/// consistency error.
#[instrument(skip(ctx))]
pub async fn delete_process_instance(
    ctx: &mut CommandContext,
    process_instance_id: &str,
    delete_reason: Option<&str>,
    cascade_history: bool,
) -> Result<()> {
    let snapshot = match ctx.find_execution(process_instance_id).await? {
        Some(execution) if !execution.is_deleted() => execution.clone(),
        _ => {
            return Err(EngineError::NotFound {
                kind: "process instance",
                id: process_instance_id.to_string(),
            });
        }
    };

    if let Some(hook) = ctx.runtime().lifecycle_hook.clone() {
        hook.before_process_instance_end(&snapshot, delete_reason)
            .await?;
    }

    delete_process_instance_cascade(
        ctx,
        process_instance_id,
        None,
        delete_reason,
        cascade_history,
        false,
    )
    .await?;

    // Special care for the process instance of a call activity: the
    // caller must resume as if the child completed.
    if let Some(super_execution_id) = snapshot.super_execution_id.clone() {
        complete_super_execution(ctx, &super_execution_id, &snapshot).await?;
    }

    if let Some(hook) = ctx.runtime().lifecycle_hook.clone() {
        hook.after_process_instance_end(process_instance_id, delete_reason)
            .await?;
    }

    info!("Process instance deleted");
    Ok(())
}

async fn complete_super_execution(
    ctx: &mut CommandContext,
    super_execution_id: &str,
    sub_process_instance: &ExecutionEntity,
) -> Result<()> {
    let Some(super_execution) = ctx.find_execution(super_execution_id).await? else {
        return Ok(());
    };
    let super_snapshot = super_execution.clone();

    let behavior = super_snapshot.current_activity_id.as_ref().and_then(|activity_id| {
        ctx.runtime()
            .behaviors
            .find_sub_process(&super_snapshot.process_definition_id, activity_id)
    });

    let Some(behavior) = behavior else {
        // No call-activity behavior registered; still clear the pair.
        return unlink_sub_process_instance(ctx, super_execution_id).await;
    };

    let result: Result<()> = async {
        behavior
            .completing(&super_snapshot, sub_process_instance)
            .await?;
        unlink_sub_process_instance(ctx, super_execution_id).await?;
        let completed_snapshot = ctx
            .require_execution(super_execution_id, "execution")
            .await?
            .clone();
        behavior.completed(&completed_snapshot).await?;
        Ok(())
    }
    .await;

    result.map_err(|e| EngineError::Consistency {
        message: format!(
            "Could not complete parent call activity of process instance '{}': {}",
            sub_process_instance.id, e
        ),
    })
}

/// Recursive deletion of a process instance subtree.
///
/// Order matters throughout: activity-instance rows first, then the
/// interruption pass over all descendants (recursing into called
/// process instances), then tasks, then one process-level cancelled
/// event, then executions leaf-to-root, then history.
#[async_recursion]
pub async fn delete_process_instance_cascade(
    ctx: &mut CommandContext,
    execution_id: &str,
    end_state: Option<&str>,
    delete_reason: Option<&str>,
    delete_history: bool,
    direct_delete_in_database: bool,
) -> Result<()> {
    let process_instance_id = ctx
        .require_execution(execution_id, "process instance")
        .await?
        .process_instance_id
        .clone();
    debug!(%process_instance_id, "Cascading process instance delete");

    // 1. Runtime activity-instance audit rows of the whole instance.
    ctx.runtime()
        .store()
        .bulk_delete_activity_instances_by_process_instance_id(&process_instance_id)
        .await?;
    ctx.cache
        .evict_activity_instances_by_process_instance(&process_instance_id);

    // 2. The full descendant list, in deterministic event order.
    let children = collect_children(ctx, &process_instance_id, &HashSet::new()).await?;

    // 3. Interrupt in-flight behaviors and tear down called instances.
    let mut already_cancelled: HashSet<String> = HashSet::new();
    for child_id in &children {
        let Some(child) = ctx.find_execution(child_id).await? else {
            continue;
        };
        if child.is_deleted() {
            continue;
        }
        let child_snapshot = child.clone();

        if child_snapshot.is_active
            && let Some(activity_id) = &child_snapshot.current_activity_id
            && let Some(behavior) = ctx
                .runtime()
                .behaviors
                .find_interruptible(&child_snapshot.process_definition_id, activity_id)
        {
            behavior.interrupted(&child_snapshot).await?;
        }

        if child_snapshot.is_multi_instance_root {
            let instance_ids = ctx.ensure_children_loaded(child_id).await?;
            for instance_id in instance_ids {
                let Some(instance) = ctx.find_execution(&instance_id).await? else {
                    continue;
                };
                let instance_snapshot = instance.clone();
                let Some(sub_id) = instance_snapshot.sub_process_instance_id.clone() else {
                    continue;
                };
                if sub_instance_alive(ctx, &sub_id).await? {
                    delete_process_instance_cascade(
                        ctx,
                        &sub_id,
                        end_state,
                        delete_reason,
                        delete_history,
                        direct_delete_in_database,
                    )
                    .await?;
                    if !direct_delete_in_database {
                        already_cancelled.insert(instance_snapshot.id.clone());
                        ctx.dispatch(EngineEvent::ActivityCancelled {
                            execution_id: instance_snapshot.id.clone(),
                            process_instance_id: instance_snapshot.process_instance_id.clone(),
                            activity_id: instance_snapshot.current_activity_id.clone(),
                            reason: delete_reason.map(str::to_string),
                        });
                    }
                }
            }
        } else if let Some(sub_id) = child_snapshot.sub_process_instance_id.clone() {
            let alive = sub_instance_alive(ctx, &sub_id).await?;
            if alive {
                delete_process_instance_cascade(
                    ctx,
                    &sub_id,
                    end_state,
                    delete_reason,
                    delete_history,
                    direct_delete_in_database,
                )
                .await?;
                if !direct_delete_in_database {
                    already_cancelled.insert(child_snapshot.id.clone());
                    ctx.dispatch(EngineEvent::ActivityCancelled {
                        execution_id: child_snapshot.id.clone(),
                        process_instance_id: child_snapshot.process_instance_id.clone(),
                        activity_id: child_snapshot.current_activity_id.clone(),
                        reason: delete_reason.map(str::to_string),
                    });
                }
            }
        }
    }

    // 4. Tasks of the whole instance, through the task collaborator.
    tasks::delete_tasks_by_process_instance_id(
        ctx,
        &process_instance_id,
        delete_reason,
        delete_history,
    )
    .await?;

    // 5. One process-level cancelled event for the whole deletion.
    if !direct_delete_in_database {
        ctx.dispatch(EngineEvent::ProcessCancelled {
            process_instance_id: process_instance_id.clone(),
            reason: delete_reason.map(str::to_string),
        });
    }

    // 6. Executions leaf-to-root: reversed collection order keeps every
    // child ahead of its parent.
    for child_id in children.iter().rev() {
        let alive = ctx
            .find_execution(child_id)
            .await?
            .map(|e| !e.is_deleted())
            .unwrap_or(false);
        if alive {
            let cancel = !already_cancelled.contains(child_id);
            delete_execution_and_related_data(
                ctx,
                child_id,
                delete_reason,
                delete_history,
                cancel,
                direct_delete_in_database,
            )
            .await?;
        }
    }
    delete_execution_and_related_data(
        ctx,
        &process_instance_id,
        delete_reason,
        delete_history,
        false,
        direct_delete_in_database,
    )
    .await?;

    // 7. Historic rows, when asked to cascade into history.
    if delete_history {
        ctx.runtime()
            .history
            .delete_process_instance_history(&process_instance_id)
            .await?;
    }

    // 8. Record the end and tombstone the instance.
    if ctx.runtime().config().history_enabled {
        ctx.runtime()
            .history
            .record_process_instance_end(
                &process_instance_id,
                end_state,
                delete_reason,
                None,
                Utc::now(),
            )
            .await?;
    }
    if let Some(process_instance) = ctx.cache.executions.get_mut(&process_instance_id) {
        process_instance.mark_deleted();
    }

    Ok(())
}

async fn sub_instance_alive(ctx: &mut CommandContext, sub_id: &str) -> Result<bool> {
    Ok(ctx
        .find_execution(sub_id)
        .await?
        .map(|s| !s.is_deleted())
        .unwrap_or(false))
}

/// End a process instance through ordinary completion or cancellation.
///
/// Cascades into call-activity children that have not ended, removes
/// event-scope executions, deletes the children and the instance
/// itself, fires the completion/cancellation event and records history.
/// A second call on an already-deleted instance is a no-op.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(ctx))]
pub async fn delete_process_instance_execution_entity(
    ctx: &mut CommandContext,
    process_instance_id: &str,
    current_flow_element_id: Option<&str>,
    delete_reason: Option<&str>,
    cascade_history: bool,
    cancel: bool,
    fire_events: bool,
) -> Result<()> {
    let snapshot = ctx
        .require_execution(process_instance_id, "process instance")
        .await?
        .clone();
    if snapshot.is_deleted() {
        // Already torn down in this command; nothing left to do.
        return Ok(());
    }

    // Call-activity children that are still running are cascaded first.
    let child_ids = ctx.ensure_children_loaded(process_instance_id).await?;
    for child_id in &child_ids {
        let Some(child) = ctx.find_execution(child_id).await? else {
            continue;
        };
        let child_ended = child.is_ended || child.is_deleted();
        let sub_id = child.sub_process_instance_id.clone();
        if let Some(sub_id) = sub_id
            && !child_ended
        {
            let alive = sub_instance_alive(ctx, &sub_id).await?;
            if alive {
                delete_process_instance_cascade(
                    ctx,
                    &sub_id,
                    None,
                    delete_reason,
                    cascade_history,
                    false,
                )
                .await?;
                if fire_events {
                    ctx.dispatch(EngineEvent::ProcessCancelled {
                        process_instance_id: sub_id.clone(),
                        reason: delete_reason.map(str::to_string),
                    });
                }
            }
        }
    }

    // Event-scope executions are parked hosts for subscriptions only;
    // they go before the ordinary children.
    for child_id in &child_ids {
        let is_event_scope = ctx
            .find_execution(child_id)
            .await?
            .map(|c| c.is_event_scope && !c.is_deleted())
            .unwrap_or(false);
        if is_event_scope {
            delete_execution_and_related_data(
                ctx,
                child_id,
                delete_reason,
                cascade_history,
                false,
                false,
            )
            .await?;
        }
    }

    delete_child_executions(
        ctx,
        process_instance_id,
        &HashSet::new(),
        &HashSet::new(),
        delete_reason,
        cancel,
        None,
    )
    .await?;
    delete_execution_and_related_data(
        ctx,
        process_instance_id,
        delete_reason,
        cascade_history,
        false,
        false,
    )
    .await?;

    if fire_events {
        if cancel {
            ctx.dispatch(EngineEvent::ProcessCancelled {
                process_instance_id: process_instance_id.to_string(),
                reason: delete_reason.map(str::to_string),
            });
        } else {
            ctx.dispatch(EngineEvent::ProcessCompleted {
                process_instance_id: process_instance_id.to_string(),
            });
        }
    }

    if ctx.runtime().config().history_enabled {
        ctx.runtime()
            .history
            .record_process_instance_end(
                process_instance_id,
                None,
                delete_reason,
                current_flow_element_id,
                Utc::now(),
            )
            .await?;
    }
    if let Some(process_instance) = ctx.cache.executions.get_mut(process_instance_id) {
        process_instance.mark_deleted();
    }

    Ok(())
}

/// Delete the children of an execution (not the execution itself) in
/// reverse collection order, skipping `ids_to_exclude`, dispatching a
/// cancelled event per deleted child that was active or a
/// multi-instance root unless the child is in
/// `ids_excluded_from_cancel`.
pub async fn delete_child_executions(
    ctx: &mut CommandContext,
    execution_id: &str,
    ids_to_exclude: &HashSet<String>,
    ids_excluded_from_cancel: &HashSet<String>,
    delete_reason: Option<&str>,
    cancel: bool,
    cancel_activity_id: Option<&str>,
) -> Result<()> {
    if let Some(activity_id) = cancel_activity_id {
        debug!(execution_id, activity_id, "Deleting child executions for cancelling activity");
    }
    let children = collect_children(ctx, execution_id, ids_to_exclude).await?;
    for child_id in children.iter().rev() {
        if ids_to_exclude.contains(child_id) {
            continue;
        }
        let Some(child) = ctx.find_execution(child_id).await? else {
            continue;
        };
        if child.is_deleted() || child.is_ended {
            continue;
        }
        let fire_cancel = cancel && !ids_excluded_from_cancel.contains(child_id);
        delete_execution_and_related_data(
            ctx,
            child_id,
            delete_reason,
            false,
            fire_cancel,
            false,
        )
        .await?;
    }
    Ok(())
}

/// The atomic per-execution teardown step: close the open activity
/// record, delete everything the execution owns, then the execution
/// row itself, then dispatch.
pub async fn delete_execution_and_related_data(
    ctx: &mut CommandContext,
    execution_id: &str,
    delete_reason: Option<&str>,
    delete_history: bool,
    cancel: bool,
    direct_delete_in_database: bool,
) -> Result<()> {
    let snapshot = ctx.require_execution(execution_id, "execution").await?.clone();
    if snapshot.is_deleted() {
        return Ok(());
    }

    if !delete_history
        && snapshot.is_active
        && snapshot.current_activity_id.is_some()
        && !snapshot.is_multi_instance_root
    {
        recorder::record_activity_end(ctx, execution_id, delete_reason).await?;
    }

    delete_related_data_for_execution(ctx, execution_id, delete_reason, direct_delete_in_database)
        .await?;

    if let Some(parent_id) = snapshot.parent_id.clone()
        && let Some(parent) = ctx.cache.executions.get_mut(&parent_id)
    {
        parent.unregister_child(execution_id);
    }

    ctx.runtime().store().delete_execution(execution_id).await?;
    if let Some(execution) = ctx.cache.executions.get_mut(execution_id) {
        execution.delete_reason = delete_reason.map(str::to_string);
        execution.mark_deleted();
    }

    if !direct_delete_in_database {
        ctx.dispatch(EngineEvent::EntityDeleted {
            kind: EntityKind::Execution,
            entity_id: execution_id.to_string(),
        });
        if cancel
            && !snapshot.is_process_instance()
            && (snapshot.is_active || snapshot.is_multi_instance_root)
        {
            ctx.dispatch(EngineEvent::ActivityCancelled {
                execution_id: execution_id.to_string(),
                process_instance_id: snapshot.process_instance_id.clone(),
                activity_id: snapshot.current_activity_id.clone(),
                reason: delete_reason.map(str::to_string),
            });
        }
    }

    Ok(())
}

/// Delete everything one execution owns, gated by the counting
/// optimization: when counting is trusted and a counter is zero, the
/// store is not consulted for that entity kind at all.
///
/// Every row removed by a bulk delete is fetched and event-notified
/// first (unless dispatching is off or the delete is direct).
pub async fn delete_related_data_for_execution(
    ctx: &mut CommandContext,
    execution_id: &str,
    delete_reason: Option<&str>,
    direct_delete_in_database: bool,
) -> Result<()> {
    let snapshot = {
        let execution = ctx.execution_mut(execution_id, "execution").await?;
        execution.is_ended = true;
        execution.is_active = false;
        execution.clone()
    };

    let counting = is_execution_related_entity_count_enabled(ctx.runtime().config(), &snapshot);
    let events = ctx.events_enabled() && !direct_delete_in_database;
    let store = ctx.runtime().store();

    // Identity links live on the process instance.
    if snapshot.is_process_instance() && (!counting || snapshot.identity_link_count() > 0) {
        if events {
            for link in store
                .find_identity_links_by_process_instance_id(execution_id)
                .await?
            {
                ctx.dispatch(EngineEvent::EntityDeleted {
                    kind: EntityKind::IdentityLink,
                    entity_id: link.id,
                });
            }
        }
        store
            .bulk_delete_identity_links_by_process_instance_id(execution_id)
            .await?;
    }

    // Entity links are purged once, at the root of the chain.
    if snapshot.is_process_instance() && snapshot.is_root_process_instance() {
        if events {
            for link in store.find_entity_links_by_root_scope_id(execution_id).await? {
                ctx.dispatch(EngineEvent::EntityDeleted {
                    kind: EntityKind::EntityLink,
                    entity_id: link.id,
                });
            }
        }
        store
            .bulk_delete_entity_links_by_root_scope_id(execution_id)
            .await?;
    }

    // Variables: spilled byte arrays go first, then one bulk delete.
    if !counting || snapshot.variable_count() > 0 {
        let variables = store.find_variables_by_execution_id(execution_id).await?;
        for variable in &variables {
            if let Some(byte_array_id) = &variable.byte_array_id {
                store.delete_byte_array(byte_array_id).await?;
            }
        }
        if events {
            for variable in &variables {
                ctx.dispatch(EngineEvent::VariableDeleted {
                    variable_id: variable.id.clone(),
                    name: variable.name.clone(),
                });
            }
        }
        store
            .bulk_delete_variables_by_execution_id(execution_id)
            .await?;
        ctx.cache.evict_variables_by_execution(execution_id);
    }

    // User tasks, through the task collaborator.
    if !counting || snapshot.task_count() > 0 {
        tasks::delete_tasks_for_execution(
            ctx,
            execution_id,
            delete_reason,
            direct_delete_in_database,
        )
        .await?;
    }

    // Jobs: each kind is gated by its own counter.
    for kind in JobKind::ALL {
        if counting && snapshot.job_count(kind) == 0 {
            continue;
        }
        if events {
            for job in store.find_jobs_by_execution_id(kind, execution_id).await? {
                ctx.dispatch(EngineEvent::JobCancelled {
                    job_id: job.id,
                    kind,
                    execution_id: job.execution_id,
                });
            }
        }
        store
            .bulk_delete_jobs_by_execution_id(kind, execution_id)
            .await?;
    }

    // Event subscriptions.
    if !counting || snapshot.event_subscription_count() > 0 {
        if events {
            for subscription in store
                .find_event_subscriptions_by_execution_id(execution_id)
                .await?
            {
                ctx.dispatch(EngineEvent::EntityDeleted {
                    kind: EntityKind::EventSubscription,
                    entity_id: subscription.id,
                });
            }
        }
        store
            .bulk_delete_event_subscriptions_by_execution_id(execution_id)
            .await?;
    }

    // Audit rows held by this execution alone.
    store
        .bulk_delete_activity_instances_by_execution_id(execution_id)
        .await?;
    ctx.cache.evict_activity_instances_by_execution(execution_id);

    // Cross-engine child case instance.
    if snapshot.reference_type.as_deref() == Some(CASE_REFERENCE_TYPE)
        && let Some(reference_id) = &snapshot.reference_id
    {
        ctx.runtime()
            .case_instances
            .delete_case_instance(reference_id, delete_reason)
            .await?;
    }

    Ok(())
}

/// Suspend or activate a process instance and its executions.
///
/// Setting the state it already has is a consistency error.
#[instrument(skip(ctx))]
pub async fn update_process_instance_suspension_state(
    ctx: &mut CommandContext,
    process_instance_id: &str,
    state: SuspensionState,
) -> Result<()> {
    let current = ctx
        .require_execution(process_instance_id, "process instance")
        .await?
        .suspension_state;
    if current == state {
        return Err(EngineError::Consistency {
            message: format!(
                "process instance '{}' is already {}",
                process_instance_id,
                state.as_str()
            ),
        });
    }

    let children = collect_children(ctx, process_instance_id, &HashSet::new()).await?;
    let process_instance = ctx
        .execution_mut(process_instance_id, "process instance")
        .await?;
    process_instance.suspension_state = state;
    for child_id in &children {
        let child = ctx.execution_mut(child_id, "execution").await?;
        // Only this instance's executions; called instances keep theirs.
        if child.process_instance_id == process_instance_id {
            child.suspension_state = state;
        }
    }
    Ok(())
}
