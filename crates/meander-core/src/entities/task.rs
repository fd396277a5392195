// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The user-task entity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{Entity, Lazy, Revisioned};

/// One user task, attached to an execution.
#[derive(Debug, Clone)]
pub struct TaskEntity {
    /// Task id.
    pub id: String,
    /// Optimistic-lock revision.
    pub revision: i32,
    /// Display name.
    pub name: Option<String>,
    /// Task-definition key (the user-task element id).
    pub task_definition_key: Option<String>,
    /// Execution the task is attached to.
    pub execution_id: Option<String>,
    /// Process instance the task belongs to.
    pub process_instance_id: Option<String>,
    /// Definition of that process instance.
    pub process_definition_id: Option<String>,
    /// Current assignee.
    pub assignee: Option<String>,
    /// Task owner.
    pub owner: Option<String>,
    /// Priority (higher is more urgent).
    pub priority: i32,
    /// Creation time.
    pub create_time: DateTime<Utc>,
    /// Due date, if set.
    pub due_date: Option<DateTime<Utc>>,
    /// Tenant id.
    pub tenant_id: Option<String>,
    /// Why the task was deleted, if it was.
    pub delete_reason: Option<String>,
    /// Whether related-entity counting is trusted for this task.
    pub count_enabled: bool,
    /// Identity links on this task, while counting is enabled.
    pub identity_link_count: i32,
    /// Variables local to this task, while counting is enabled.
    pub variable_count: i32,
    /// Local variable-instance ids, once loaded.
    pub variable_ids: Lazy<Vec<String>>,
    /// Variables touched by this command, name to variable-instance id.
    pub used_variables: HashMap<String, String>,
    is_deleted: bool,
}

impl TaskEntity {
    /// Create a task with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: 1,
            name: None,
            task_definition_key: None,
            execution_id: None,
            process_instance_id: None,
            process_definition_id: None,
            assignee: None,
            owner: None,
            priority: 50,
            create_time: Utc::now(),
            due_date: None,
            tenant_id: None,
            delete_reason: None,
            count_enabled: false,
            identity_link_count: 0,
            variable_count: 0,
            variable_ids: Lazy::Unloaded,
            used_variables: HashMap::new(),
            is_deleted: false,
        }
    }

    /// Whether the task has been deleted. Monotonic.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// Mark the task deleted.
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl Entity for TaskEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Revisioned for TaskEntity {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}
