// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime entity types and the capability traits they compose.
//!
//! Entities are plain structs; cross-entity relationships are id
//! references resolved against the command context's cache rather than
//! object pointers, and relationship collections carry an explicit
//! loaded/unloaded state instead of implicit load-on-first-read.

pub mod activity_instance;
pub mod execution;
pub mod job;
pub mod link;
pub mod subscription;
pub mod task;
pub mod variable;

pub use self::activity_instance::ActivityInstanceEntity;
pub use self::execution::{CountDeltas, EntityCounts, ExecutionEntity};
pub use self::job::{JobEntity, JobKind};
pub use self::link::{EntityLinkEntity, IdentityLinkEntity};
pub use self::subscription::EventSubscriptionEntity;
pub use self::task::TaskEntity;
pub use self::variable::{ByteArrayEntity, VariableInstanceEntity};

/// Anything with a stable string id.
pub trait Entity {
    /// The entity id.
    fn id(&self) -> &str;
}

/// Anything guarded by an optimistic-lock revision counter.
pub trait Revisioned {
    /// Current revision.
    fn revision(&self) -> i32;
    /// Replace the revision. Only the flush path should call this.
    fn set_revision(&mut self, revision: i32);
}

/// Explicit loaded/unloaded state for a lazily-resolved relationship.
///
/// Loading is triggered by the command context, never implicitly on
/// read, so the store round-trip (and its failure mode) is visible at
/// the call site.
#[derive(Debug, Clone, Default)]
pub enum Lazy<T> {
    /// Not resolved yet; a store query is required.
    #[default]
    Unloaded,
    /// Resolved value.
    Loaded(T),
}

impl<T> Lazy<T> {
    /// Whether the relationship has been resolved.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Lazy::Loaded(_))
    }

    /// The loaded value, if resolved.
    pub fn get(&self) -> Option<&T> {
        match self {
            Lazy::Loaded(value) => Some(value),
            Lazy::Unloaded => None,
        }
    }

    /// Mutable access to the loaded value, if resolved.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Lazy::Loaded(value) => Some(value),
            Lazy::Unloaded => None,
        }
    }

    /// Mark the relationship resolved with `value`.
    pub fn set(&mut self, value: T) {
        *self = Lazy::Loaded(value);
    }
}

/// Suspension state of an execution or process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspensionState {
    /// Runnable.
    #[default]
    Active,
    /// Administratively suspended.
    Suspended,
}

impl SuspensionState {
    /// String representation, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    /// Parse a persisted state string. Unknown values read as active.
    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => Self::Suspended,
            _ => Self::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_starts_unloaded() {
        let lazy: Lazy<Vec<String>> = Lazy::default();
        assert!(!lazy.is_loaded());
        assert!(lazy.get().is_none());
    }

    #[test]
    fn test_lazy_set_marks_loaded() {
        let mut lazy: Lazy<Vec<String>> = Lazy::Unloaded;
        lazy.set(vec!["a".to_string()]);
        assert!(lazy.is_loaded());
        assert_eq!(lazy.get().map(|v| v.len()), Some(1));
    }

    #[test]
    fn test_suspension_state_roundtrip() {
        for state in [SuspensionState::Active, SuspensionState::Suspended] {
            assert_eq!(SuspensionState::parse(state.as_str()), state);
        }
        assert_eq!(SuspensionState::parse("garbage"), SuspensionState::Active);
    }
}
