// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job entities - units of deferred or async work referencing an
//! execution.

use chrono::{DateTime, Utc};

use super::{Entity, Revisioned};

/// The job taxonomy. Each kind is counted independently on its
/// execution so deletion logic can skip the store when a kind's count
/// is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Plain async continuation.
    Message,
    /// Timer waiting to fire.
    Timer,
    /// Job parked because its process instance is suspended.
    Suspended,
    /// Job that exhausted its retries.
    DeadLetter,
    /// Job handed to an external worker.
    ExternalWorker,
}

impl JobKind {
    /// All job kinds, in cascade-deletion order.
    pub const ALL: [JobKind; 5] = [
        JobKind::Message,
        JobKind::Timer,
        JobKind::Suspended,
        JobKind::DeadLetter,
        JobKind::ExternalWorker,
    ];

    /// String representation, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Timer => "timer",
            Self::Suspended => "suspended",
            Self::DeadLetter => "deadletter",
            Self::ExternalWorker => "external-worker",
        }
    }

    /// Parse a persisted kind string. Unknown values read as message.
    pub fn parse(s: &str) -> Self {
        match s {
            "timer" => Self::Timer,
            "suspended" => Self::Suspended,
            "deadletter" => Self::DeadLetter,
            "external-worker" => Self::ExternalWorker,
            _ => Self::Message,
        }
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone)]
pub struct JobEntity {
    /// Job id.
    pub id: String,
    /// Optimistic-lock revision.
    pub revision: i32,
    /// Which job table this row conceptually lives in.
    pub kind: JobKind,
    /// Execution the job belongs to.
    pub execution_id: Option<String>,
    /// Process instance the job belongs to.
    pub process_instance_id: Option<String>,
    /// Definition of that process instance.
    pub process_definition_id: Option<String>,
    /// Flow element the job was created for.
    pub element_id: Option<String>,
    /// Handler type dispatched by the job executor.
    pub handler_type: Option<String>,
    /// Opaque handler configuration.
    pub handler_config: Option<String>,
    /// Remaining retries.
    pub retries: i32,
    /// Whether the job requires the exclusive execution lock.
    pub exclusive: bool,
    /// Earliest execution time, for timers.
    pub due_date: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Tenant id.
    pub tenant_id: Option<String>,
}

impl JobEntity {
    /// Create a job of the given kind.
    pub fn new(id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            id: id.into(),
            revision: 1,
            kind,
            execution_id: None,
            process_instance_id: None,
            process_definition_id: None,
            element_id: None,
            handler_type: None,
            handler_config: None,
            retries: 3,
            exclusive: false,
            due_date: None,
            created_at: Utc::now(),
            tenant_id: None,
        }
    }
}

impl Entity for JobEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Revisioned for JobEntity {
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

    #[test]
    fn test_job_kind_roundtrip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::parse(kind.as_str()), kind);
        }
    }
}
