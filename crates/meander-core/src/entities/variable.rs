// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Variable instances and their byte-array spill storage.

use serde_json::Value;

use super::{Entity, Revisioned};

/// Serialized values longer than this spill into a byte-array row
/// instead of the inline value column.
pub const VARIABLE_INLINE_LIMIT: usize = 4000;

/// One named value attached to an execution or a task.
#[derive(Debug, Clone)]
pub struct VariableInstanceEntity {
    /// Variable-instance id.
    pub id: String,
    /// Optimistic-lock revision.
    pub revision: i32,
    /// Variable name, unique per scope.
    pub name: String,
    /// Owning execution, for execution-scoped variables.
    pub execution_id: Option<String>,
    /// Owning task, for task-local variables.
    pub task_id: Option<String>,
    /// Process instance the variable belongs to.
    pub process_instance_id: Option<String>,
    /// Inline value. `Value::Null` when the value spilled to bytes.
    pub value: Value,
    /// Byte-array row holding the spilled value, if any.
    pub byte_array_id: Option<String>,
    /// Tenant id.
    pub tenant_id: Option<String>,
}

impl VariableInstanceEntity {
    /// Create a variable instance.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: 1,
            name: name.into(),
            execution_id: None,
            task_id: None,
            process_instance_id: None,
            value: Value::Null,
            byte_array_id: None,
            tenant_id: None,
        }
    }

    /// Whether the serialized form of `value` must spill to a byte array.
    pub fn needs_byte_array(value: &Value) -> bool {
        // to_string cannot fail for a Value.
        serde_json::to_string(value)
            .map(|s| s.len() > VARIABLE_INLINE_LIMIT)
            .unwrap_or(false)
    }
}

impl Entity for VariableInstanceEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Revisioned for VariableInstanceEntity {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}

/// Spill storage for large variable values.
#[derive(Debug, Clone)]
pub struct ByteArrayEntity {
    /// Byte-array id.
    pub id: String,
    /// Name, for diagnostics (mirrors the variable name).
    pub name: Option<String>,
    /// The serialized value.
    pub bytes: Vec<u8>,
}

impl Entity for ByteArrayEntity {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_values_stay_inline() {
        assert!(!VariableInstanceEntity::needs_byte_array(&json!(42)));
        assert!(!VariableInstanceEntity::needs_byte_array(&json!("short")));
    }

    #[test]
    fn test_large_values_spill() {
        let large = json!("x".repeat(VARIABLE_INLINE_LIMIT + 1));
        assert!(VariableInstanceEntity::needs_byte_array(&large));
    }
}
