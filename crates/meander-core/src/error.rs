// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for meander-core.
//!
//! Provides a unified error type with stable error codes for callers that
//! need to branch on failure categories (not-found vs. concurrency vs.
//! consistency).

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while executing a command.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// A requested entity was not found in the store.
    NotFound {
        /// The conceptual entity kind (e.g. "process instance", "execution").
        kind: &'static str,
        /// The id that was requested.
        id: String,
    },

    /// The engine reached a state that should be impossible under correct
    /// usage, or a collaborator failed in a way that leaves the command
    /// unable to complete. Aborts the whole unit of work.
    Consistency {
        /// Description of the violated expectation.
        message: String,
    },

    /// A local variable with this name already exists on the scope.
    /// Callers needing overwrite semantics must use the update path.
    DuplicateVariable {
        /// The variable name.
        name: String,
        /// The scope that already owns the variable.
        scope_id: String,
    },

    /// A lazy relationship load was attempted after the command context
    /// was closed.
    LazyLoadOutsideCommand {
        /// The relationship that was being resolved.
        relation: &'static str,
    },

    /// An optimistic-lock check failed at flush time. Retriable by the
    /// caller's command-retry layer.
    ConcurrencyConflict {
        /// The entity kind whose update was rejected.
        kind: &'static str,
        /// The entity id.
        id: String,
    },

    /// Input validation failed.
    Validation {
        /// The field that failed validation.
        field: &'static str,
        /// The validation error message.
        message: String,
    },

    /// A store operation failed.
    Storage {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Consistency { .. } => "CONSISTENCY_VIOLATION",
            Self::DuplicateVariable { .. } => "DUPLICATE_VARIABLE",
            Self::LazyLoadOutsideCommand { .. } => "LAZY_LOAD_OUTSIDE_COMMAND",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
        }
    }

    /// Whether the failure is a transient write conflict that an outer
    /// command-retry layer may retry.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => {
                write!(f, "No {} found with id '{}'", kind, id)
            }
            Self::Consistency { message } => {
                write!(f, "Consistency violation: {}", message)
            }
            Self::DuplicateVariable { name, scope_id } => {
                write!(
                    f,
                    "Variable '{}' already exists on scope '{}'",
                    name, scope_id
                )
            }
            Self::LazyLoadOutsideCommand { relation } => {
                write!(
                    f,
                    "Cannot resolve '{}' outside an active command context",
                    relation
                )
            }
            Self::ConcurrencyConflict { kind, id } => {
                write!(
                    f,
                    "{} '{}' was updated concurrently by another command",
                    kind, id
                )
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::Storage { operation, details } => {
                write!(f, "Storage error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Storage {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                EngineError::NotFound {
                    kind: "process instance",
                    id: "pi-1".to_string(),
                },
                "NOT_FOUND",
            ),
            (
                EngineError::Consistency {
                    message: "orphaned child".to_string(),
                },
                "CONSISTENCY_VIOLATION",
            ),
            (
                EngineError::DuplicateVariable {
                    name: "orderId".to_string(),
                    scope_id: "exec-1".to_string(),
                },
                "DUPLICATE_VARIABLE",
            ),
            (
                EngineError::LazyLoadOutsideCommand {
                    relation: "child executions",
                },
                "LAZY_LOAD_OUTSIDE_COMMAND",
            ),
            (
                EngineError::ConcurrencyConflict {
                    kind: "execution",
                    id: "exec-1".to_string(),
                },
                "CONCURRENCY_CONFLICT",
            ),
            (
                EngineError::Validation {
                    field: "process_definition_id",
                    message: "is required".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                EngineError::Storage {
                    operation: "insert".to_string(),
                    details: "disk full".to_string(),
                },
                "STORAGE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_not_found_display_names_the_entity_kind() {
        let err = EngineError::NotFound {
            kind: "process instance",
            id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "No process instance found with id 'abc-123'");
    }

    #[test]
    fn test_only_concurrency_conflicts_are_retriable() {
        assert!(
            EngineError::ConcurrencyConflict {
                kind: "execution",
                id: "x".to_string()
            }
            .is_retriable()
        );
        assert!(
            !EngineError::Consistency {
                message: "x".to_string()
            }
            .is_retriable()
        );
        assert!(
            !EngineError::NotFound {
                kind: "execution",
                id: "x".to_string()
            }
            .is_retriable()
        );
    }
}
