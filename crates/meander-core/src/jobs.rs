// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job creation and deletion with per-kind counting bookkeeping.
//!
//! Scheduling and execution of jobs belong to the async executor
//! outside this crate; the core only manages the rows and keeps the
//! per-execution counters honest.

use tracing::{debug, instrument};

use crate::context::CommandContext;
use crate::entities::{JobEntity, JobKind};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EntityKind};
use crate::store::RuntimeStore;

/// Inputs for creating a job.
#[derive(Debug, Clone, Default)]
pub struct JobCreateParams {
    /// Execution the job references.
    pub execution_id: Option<String>,
    /// Flow element the job was created for.
    pub element_id: Option<String>,
    /// Handler type dispatched by the job executor.
    pub handler_type: Option<String>,
    /// Opaque handler configuration.
    pub handler_config: Option<String>,
    /// Earliest execution time, for timers.
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
    /// Whether the job needs the exclusive execution lock.
    pub exclusive: bool,
}

/// Create a job of the given kind and count it on its execution.
#[instrument(skip(ctx, params))]
pub async fn create_job(
    ctx: &mut CommandContext,
    kind: JobKind,
    params: JobCreateParams,
) -> Result<String> {
    let id = ctx.next_id();
    let mut job = JobEntity::new(id.clone(), kind);
    job.element_id = params.element_id.clone();
    job.handler_type = params.handler_type.clone();
    job.handler_config = params.handler_config.clone();
    job.due_date = params.due_date;
    job.exclusive = params.exclusive;

    if let Some(execution_id) = &params.execution_id {
        let counting_enabled = ctx
            .runtime()
            .config()
            .execution_related_entities_count_enabled;
        let execution = ctx.require_execution(execution_id, "execution").await?;
        job.execution_id = Some(execution_id.clone());
        job.process_instance_id = Some(execution.process_instance_id.clone());
        job.process_definition_id = Some(execution.process_definition_id.clone());
        job.tenant_id = execution.tenant_id.clone();
        if counting_enabled && execution.count_enabled {
            execution.count_deltas.add_jobs(kind, 1);
        }
    }

    ctx.runtime().store().insert_job(&job).await?;

    ctx.dispatch(EngineEvent::EntityCreated {
        kind: EntityKind::Job,
        entity_id: id.clone(),
    });

    debug!(job_id = %id, kind = kind.as_str(), "Job created");
    Ok(id)
}

/// Delete one job and uncount it from its execution.
#[instrument(skip(ctx))]
pub async fn delete_job(ctx: &mut CommandContext, job_id: &str) -> Result<()> {
    let job = ctx
        .runtime()
        .store()
        .find_job_by_id(job_id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            kind: "job",
            id: job_id.to_string(),
        })?;

    ctx.runtime().store().delete_job(job_id).await?;

    if let Some(execution_id) = &job.execution_id {
        let counting_enabled = ctx
            .runtime()
            .config()
            .execution_related_entities_count_enabled;
        if counting_enabled {
            if let Some(execution) = ctx.find_execution(execution_id).await? {
                if execution.count_enabled && !execution.is_deleted() {
                    execution.count_deltas.add_jobs(job.kind, -1);
                }
            }
        }
    }

    ctx.dispatch(EngineEvent::EntityDeleted {
        kind: EntityKind::Job,
        entity_id: job_id.to_string(),
    });

    debug!(job_id, "Job deleted");
    Ok(())
}
