//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `cache_path` is empty or looks like a connection string (file-backed only)
    /// - `cleanup_interval_ms` is 0
    /// - `max_idle_connections` is 0
    /// - `busy_timeout_ms` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.memory_only {
            let path = self.cache_path.to_string_lossy();
            if path.trim().is_empty() {
                return Err(ConfigError::Invalid { field: "cache_path".into(), reason: "must not be empty".into() });
            }
            if looks_like_connection_string(&path) {
                return Err(ConfigError::Invalid {
                    field: "cache_path".into(),
                    reason: "expected a bare file path, not a connection string".into(),
                });
            }
        } else if self.cache_path != CacheConfig::default().cache_path {
            tracing::debug!(cache_path = %self.cache_path.display(), "memory_only is set; cache_path is ignored");
        }

        if self.cleanup_interval_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "cleanup_interval_ms".into(),
                reason: "must be greater than 0 (leave unset to disable)".into(),
            });
        }

        if self.max_idle_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "max_idle_connections".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "busy_timeout_ms".into(), reason: "must be greater than 0".into() });
        }

        Ok(())
    }
}

/// `Data Source=x.db;Mode=...` style strings and SQLite URIs are not paths.
fn looks_like_connection_string(path: &str) -> bool {
    path.contains('=') || path.contains(';') || path.trim_start().to_ascii_lowercase().starts_with("file:")
}
