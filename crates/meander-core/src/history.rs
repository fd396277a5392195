// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! History manager contract.
//!
//! The history store itself lives outside this crate; the core only
//! mirrors runtime transitions into it. Every method defaults to a
//! no-op so embedders implement exactly the slices they persist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use crate::entities::{ActivityInstanceEntity, TaskEntity, VariableInstanceEntity};
use crate::error::Result;

/// History manager contract consumed by the runtime core.
#[async_trait]
pub trait HistoryManager: Send + Sync {
    /// An execution entered a flow node.
    async fn record_activity_start(&self, _activity: &ActivityInstanceEntity) -> Result<()> {
        Ok(())
    }

    /// An execution left a flow node.
    async fn record_activity_end(
        &self,
        _activity: &ActivityInstanceEntity,
        _delete_reason: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    /// A process instance reached its end (completion, cancellation or
    /// administrative deletion).
    async fn record_process_instance_end(
        &self,
        _process_instance_id: &str,
        _state: Option<&str>,
        _delete_reason: Option<&str>,
        _activity_id: Option<&str>,
        _end_time: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }

    /// A user task was created.
    async fn record_task_created(&self, _task: &TaskEntity) -> Result<()> {
        Ok(())
    }

    /// A user task's metadata changed (assignee, priority, ...).
    async fn record_task_info_change(&self, _task: &TaskEntity) -> Result<()> {
        Ok(())
    }

    /// A user task ended.
    async fn record_task_ended(&self, _task_id: &str, _delete_reason: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// A variable was created.
    async fn record_variable_create(&self, _variable: &VariableInstanceEntity) -> Result<()> {
        Ok(())
    }

    /// A variable's value changed.
    async fn record_variable_update(&self, _variable: &VariableInstanceEntity) -> Result<()> {
        Ok(())
    }

    /// A variable was removed.
    async fn record_variable_removed(&self, _variable: &VariableInstanceEntity) -> Result<()> {
        Ok(())
    }

    /// Detail audit row for a variable mutation, tagged with the
    /// execution the write originated from.
    async fn record_historic_detail(
        &self,
        _variable: &VariableInstanceEntity,
        _source_execution_id: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    /// Purge all historic rows of a process instance.
    async fn delete_process_instance_history(&self, _process_instance_id: &str) -> Result<()> {
        Ok(())
    }
}

/// History manager that records nothing.
#[derive(Debug, Default)]
pub struct NoopHistoryManager;

impl HistoryManager for NoopHistoryManager {}

/// One recorded history call, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum HistoryEntry {
    /// record_activity_start
    ActivityStart {
        /// Activity id.
        activity_id: String,
        /// Execution id.
        execution_id: String,
    },
    /// record_activity_end
    ActivityEnd {
        /// Activity id.
        activity_id: String,
        /// Execution id.
        execution_id: String,
        /// Reason passed by the caller.
        delete_reason: Option<String>,
    },
    /// record_process_instance_end
    ProcessInstanceEnd {
        /// Process instance id.
        process_instance_id: String,
        /// End state.
        state: Option<String>,
        /// Reason passed by the caller.
        delete_reason: Option<String>,
    },
    /// record_task_created
    TaskCreated {
        /// Task id.
        task_id: String,
    },
    /// record_task_ended
    TaskEnded {
        /// Task id.
        task_id: String,
        /// Reason passed by the caller.
        delete_reason: Option<String>,
    },
    /// record_variable_create
    VariableCreate {
        /// Variable name.
        name: String,
    },
    /// record_variable_update
    VariableUpdate {
        /// Variable name.
        name: String,
    },
    /// record_variable_removed
    VariableRemoved {
        /// Variable name.
        name: String,
    },
    /// record_historic_detail
    Detail {
        /// Variable name.
        name: String,
        /// Originating execution.
        source_execution_id: Option<String>,
    },
    /// delete_process_instance_history
    HistoryPurged {
        /// Process instance id.
        process_instance_id: String,
    },
}

/// History manager that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingHistoryManager {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl RecordingHistoryManager {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded calls.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn push(&self, entry: HistoryEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl HistoryManager for RecordingHistoryManager {
    async fn record_activity_start(&self, activity: &ActivityInstanceEntity) -> Result<()> {
        self.push(HistoryEntry::ActivityStart {
            activity_id: activity.activity_id.clone(),
            execution_id: activity.execution_id.clone(),
        });
        Ok(())
    }

    async fn record_activity_end(
        &self,
        activity: &ActivityInstanceEntity,
        delete_reason: Option<&str>,
    ) -> Result<()> {
        self.push(HistoryEntry::ActivityEnd {
            activity_id: activity.activity_id.clone(),
            execution_id: activity.execution_id.clone(),
            delete_reason: delete_reason.map(str::to_string),
        });
        Ok(())
    }

    async fn record_process_instance_end(
        &self,
        process_instance_id: &str,
        state: Option<&str>,
        delete_reason: Option<&str>,
        _activity_id: Option<&str>,
        _end_time: DateTime<Utc>,
    ) -> Result<()> {
        self.push(HistoryEntry::ProcessInstanceEnd {
            process_instance_id: process_instance_id.to_string(),
            state: state.map(str::to_string),
            delete_reason: delete_reason.map(str::to_string),
        });
        Ok(())
    }

    async fn record_task_created(&self, task: &TaskEntity) -> Result<()> {
        self.push(HistoryEntry::TaskCreated {
            task_id: task.id.clone(),
        });
        Ok(())
    }

    async fn record_task_ended(&self, task_id: &str, delete_reason: Option<&str>) -> Result<()> {
        self.push(HistoryEntry::TaskEnded {
            task_id: task_id.to_string(),
            delete_reason: delete_reason.map(str::to_string),
        });
        Ok(())
    }

    async fn record_variable_create(&self, variable: &VariableInstanceEntity) -> Result<()> {
        self.push(HistoryEntry::VariableCreate {
            name: variable.name.clone(),
        });
        Ok(())
    }

    async fn record_variable_update(&self, variable: &VariableInstanceEntity) -> Result<()> {
        self.push(HistoryEntry::VariableUpdate {
            name: variable.name.clone(),
        });
        Ok(())
    }

    async fn record_variable_removed(&self, variable: &VariableInstanceEntity) -> Result<()> {
        self.push(HistoryEntry::VariableRemoved {
            name: variable.name.clone(),
        });
        Ok(())
    }

    async fn record_historic_detail(
        &self,
        variable: &VariableInstanceEntity,
        source_execution_id: Option<&str>,
    ) -> Result<()> {
        self.push(HistoryEntry::Detail {
            name: variable.name.clone(),
            source_execution_id: source_execution_id.map(str::to_string),
        });
        Ok(())
    }

    async fn delete_process_instance_history(&self, process_instance_id: &str) -> Result<()> {
        self.push(HistoryEntry::HistoryPurged {
            process_instance_id: process_instance_id.to_string(),
        });
        Ok(())
    }
}
