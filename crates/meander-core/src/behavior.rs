// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Contracts toward the activity-behavior layer and other embedding
//! collaborators.
//!
//! The behavior implementations live in the BPMN execution layer; this
//! core only invokes them at the points the deletion algorithms
//! require: interrupting in-flight work and resuming a call-activity
//! caller whose child process instance is torn down.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::ExecutionEntity;
use crate::error::Result;

/// Behavior hook invoked when an in-flight activity is interrupted by
/// a cascade delete, before its execution is torn down.
#[async_trait]
pub trait InterruptibleActivityBehavior: Send + Sync {
    /// The execution occupying the activity is about to be deleted.
    async fn interrupted(&self, execution: &ExecutionEntity) -> Result<()>;
}

/// Behavior hooks of a call activity, invoked when its child process
/// instance is administratively deleted so the caller resumes.
#[async_trait]
pub trait SubProcessActivityBehavior: Send + Sync {
    /// The child process instance is completing; output mappings run
    /// here while the child still exists.
    async fn completing(
        &self,
        execution: &ExecutionEntity,
        sub_process_instance: &ExecutionEntity,
    ) -> Result<()>;

    /// The child process instance is gone; the caller may continue.
    async fn completed(&self, execution: &ExecutionEntity) -> Result<()>;
}

/// Hook notified before and after a process instance ends.
#[async_trait]
pub trait ProcessInstanceLifecycleHook: Send + Sync {
    /// Called before the delete cascade starts.
    async fn before_process_instance_end(
        &self,
        _process_instance: &ExecutionEntity,
        _delete_reason: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the cascade (and any caller completion) finished.
    async fn after_process_instance_end(
        &self,
        _process_instance_id: &str,
        _delete_reason: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Cross-engine collaborator that owns case instances referenced by
/// executions. Deleting an execution with a case reference delegates
/// the child teardown here.
#[async_trait]
pub trait CaseInstanceService: Send + Sync {
    /// Delete a case instance and everything it owns.
    async fn delete_case_instance(
        &self,
        _case_instance_id: &str,
        _delete_reason: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Case service that does nothing (no case engine attached).
#[derive(Debug, Default)]
pub struct NoopCaseInstanceService;

impl CaseInstanceService for NoopCaseInstanceService {}

/// Behaviors registered per (process definition, activity) pair.
///
/// Built once at engine startup from the parsed model; read-only
/// afterwards.
#[derive(Default)]
pub struct BehaviorRegistry {
    interruptible: HashMap<(String, String), Arc<dyn InterruptibleActivityBehavior>>,
    sub_process: HashMap<(String, String), Arc<dyn SubProcessActivityBehavior>>,
}

impl BehaviorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interruptible behavior for an activity.
    pub fn register_interruptible(
        &mut self,
        process_definition_id: impl Into<String>,
        activity_id: impl Into<String>,
        behavior: Arc<dyn InterruptibleActivityBehavior>,
    ) {
        self.interruptible
            .insert((process_definition_id.into(), activity_id.into()), behavior);
    }

    /// Register a call-activity behavior for an activity.
    pub fn register_sub_process(
        &mut self,
        process_definition_id: impl Into<String>,
        activity_id: impl Into<String>,
        behavior: Arc<dyn SubProcessActivityBehavior>,
    ) {
        self.sub_process
            .insert((process_definition_id.into(), activity_id.into()), behavior);
    }

    /// Look up the interruptible behavior of an activity.
    pub fn find_interruptible(
        &self,
        process_definition_id: &str,
        activity_id: &str,
    ) -> Option<Arc<dyn InterruptibleActivityBehavior>> {
        self.interruptible
            .get(&(process_definition_id.to_string(), activity_id.to_string()))
            .cloned()
    }

    /// Look up the call-activity behavior of an activity.
    pub fn find_sub_process(
        &self,
        process_definition_id: &str,
        activity_id: &str,
    ) -> Option<Arc<dyn SubProcessActivityBehavior>> {
        self.sub_process
            .get(&(process_definition_id.to_string(), activity_id.to_string()))
            .cloned()
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("interruptible", &self.interruptible.len())
            .field("sub_process", &self.sub_process.len())
            .finish()
    }
}
