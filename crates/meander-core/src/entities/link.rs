// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity links (who may act on a task or process instance) and
//! entity links (scope-to-scope containment across the root process
//! instance).

use chrono::{DateTime, Utc};

use super::Entity;

/// Association between a user or group and a task or process instance.
#[derive(Debug, Clone)]
pub struct IdentityLinkEntity {
    /// Link id.
    pub id: String,
    /// Link type ("assignee", "candidate", "owner", "participant", ...).
    pub link_type: String,
    /// Linked user.
    pub user_id: Option<String>,
    /// Linked group.
    pub group_id: Option<String>,
    /// Task side of the link, for task links.
    pub task_id: Option<String>,
    /// Process-instance side of the link, for instance links.
    pub process_instance_id: Option<String>,
}

impl Entity for IdentityLinkEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Containment link between scopes, rooted at the root process
/// instance so a whole call-activity chain can be purged in one pass.
#[derive(Debug, Clone)]
pub struct EntityLinkEntity {
    /// Link id.
    pub id: String,
    /// Link type ("child").
    pub link_type: String,
    /// Containing scope id.
    pub scope_id: String,
    /// Containing scope type ("bpmn").
    pub scope_type: String,
    /// Contained scope id.
    pub reference_scope_id: String,
    /// Contained scope type.
    pub reference_scope_type: String,
    /// Root scope of the chain.
    pub root_scope_id: String,
    /// Creation time.
    pub create_time: DateTime<Utc>,
}

impl Entity for EntityLinkEntity {
    fn id(&self) -> &str {
        &self.id
    }
}
