// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration.
//!
//! Configuration is immutable once the engine is built; there is no
//! runtime mutation of these flags.

/// Meander engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maintain per-execution related-entity counters so deletion and
    /// query logic can skip store round-trips when a count is zero.
    pub execution_related_entities_count_enabled: bool,
    /// Maintain per-task related-entity counters (identity links,
    /// variables).
    pub task_related_entities_count_enabled: bool,
    /// Record runtime activity-instance rows when executions enter and
    /// leave flow nodes.
    pub record_runtime_activities: bool,
    /// Forward lifecycle transitions to the history manager.
    pub history_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_related_entities_count_enabled: true,
            task_related_entities_count_enabled: true,
            record_runtime_activities: true,
            history_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional booleans (`true`/`false`):
    /// - `MEANDER_EXECUTION_COUNT_ENABLED` (default: true)
    /// - `MEANDER_TASK_COUNT_ENABLED` (default: true)
    /// - `MEANDER_RECORD_RUNTIME_ACTIVITIES` (default: true)
    /// - `MEANDER_HISTORY_ENABLED` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            execution_related_entities_count_enabled: bool_var(
                "MEANDER_EXECUTION_COUNT_ENABLED",
                true,
            )?,
            task_related_entities_count_enabled: bool_var("MEANDER_TASK_COUNT_ENABLED", true)?,
            record_runtime_activities: bool_var("MEANDER_RECORD_RUNTIME_ACTIVITIES", true)?,
            history_enabled: bool_var("MEANDER_HISTORY_ENABLED", true)?,
        })
    }
}

fn bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<bool>()
            .map_err(|_| ConfigError::Invalid(name, "must be 'true' or 'false'")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("MEANDER_EXECUTION_COUNT_ENABLED");
        guard.remove("MEANDER_TASK_COUNT_ENABLED");
        guard.remove("MEANDER_RECORD_RUNTIME_ACTIVITIES");
        guard.remove("MEANDER_HISTORY_ENABLED");

        let config = EngineConfig::from_env().expect("defaults should load");
        assert!(config.execution_related_entities_count_enabled);
        assert!(config.task_related_entities_count_enabled);
        assert!(config.record_runtime_activities);
        assert!(config.history_enabled);
    }

    #[test]
    fn test_flags_can_be_disabled() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("MEANDER_EXECUTION_COUNT_ENABLED", "false");
        guard.set("MEANDER_RECORD_RUNTIME_ACTIVITIES", "false");
        guard.remove("MEANDER_TASK_COUNT_ENABLED");
        guard.remove("MEANDER_HISTORY_ENABLED");

        let config = EngineConfig::from_env().expect("flags should parse");
        assert!(!config.execution_related_entities_count_enabled);
        assert!(!config.record_runtime_activities);
        assert!(config.task_related_entities_count_enabled);
        assert!(config.history_enabled);
    }

    #[test]
    fn test_invalid_boolean_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("MEANDER_HISTORY_ENABLED", "yes");

        let err = EngineConfig::from_env().expect_err("'yes' is not a boolean");
        assert!(err.to_string().contains("MEANDER_HISTORY_ENABLED"));
    }
}
