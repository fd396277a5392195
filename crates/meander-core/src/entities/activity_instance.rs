// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity-instance audit records - one row per occupancy of one
//! activity by one execution.

use chrono::{DateTime, Utc};

use super::{Entity, Revisioned};

/// Audit record of an execution occupying a flow node.
///
/// At most one open record (end time null) exists per
/// (execution, activity) pair; the recorder consults the cache before
/// creating a new row.
#[derive(Debug, Clone)]
pub struct ActivityInstanceEntity {
    /// Activity-instance id.
    pub id: String,
    /// Optimistic-lock revision.
    pub revision: i32,
    /// Definition of the process instance.
    pub process_definition_id: String,
    /// Process instance the record belongs to.
    pub process_instance_id: String,
    /// Execution that occupied the activity.
    pub execution_id: String,
    /// The activity's element id.
    pub activity_id: String,
    /// The activity's display name.
    pub activity_name: Option<String>,
    /// Lower-camel-cased element type name ("userTask", ...).
    pub activity_type: String,
    /// Assignee, for user tasks.
    pub assignee: Option<String>,
    /// Task spawned by the activity, for user tasks.
    pub task_id: Option<String>,
    /// When the execution entered the activity.
    pub start_time: DateTime<Utc>,
    /// When the execution left the activity.
    pub end_time: Option<DateTime<Utc>>,
    /// Occupancy duration in milliseconds, set on end.
    pub duration_ms: Option<i64>,
    /// Why the occupancy ended abnormally, if it did.
    pub delete_reason: Option<String>,
    /// Tenant id.
    pub tenant_id: Option<String>,
}

impl ActivityInstanceEntity {
    /// Whether the record is still open.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Close the record at `end_time`, computing the duration.
    pub fn mark_ended(&mut self, end_time: DateTime<Utc>, delete_reason: Option<&str>) {
        self.end_time = Some(end_time);
        self.duration_ms = Some((end_time - self.start_time).num_milliseconds());
        if let Some(reason) = delete_reason {
            self.delete_reason = Some(reason.to_string());
        }
    }
}

impl Entity for ActivityInstanceEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Revisioned for ActivityInstanceEntity {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> ActivityInstanceEntity {
        ActivityInstanceEntity {
            id: "ai-1".to_string(),
            revision: 1,
            process_definition_id: "def:1".to_string(),
            process_instance_id: "pi-1".to_string(),
            execution_id: "e1".to_string(),
            activity_id: "task1".to_string(),
            activity_name: None,
            activity_type: "userTask".to_string(),
            assignee: None,
            task_id: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            delete_reason: None,
            tenant_id: None,
        }
    }

    #[test]
    fn test_mark_ended_computes_duration() {
        let mut instance = record();
        let end = instance.start_time + Duration::milliseconds(250);
        assert!(instance.is_open());

        instance.mark_ended(end, Some("cancelled"));
        assert!(!instance.is_open());
        assert_eq!(instance.duration_ms, Some(250));
        assert_eq!(instance.delete_reason.as_deref(), Some("cancelled"));
    }
}
