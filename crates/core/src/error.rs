//! Unified error types for litecache.
//!
//! Incompatible cache files never show up here: the schema manager rebuilds
//! them in place. Everything else surfaces to the caller.

use std::path::PathBuf;

use rusqlite::ErrorCode;

use crate::config::ConfigError;

/// Unified error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid per-call input (e.g., a negative sliding expiration).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Configuration rejected before any storage access.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// SQLite reported an error.
    #[error("CACHE_ERROR: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem operation on the cache file failed.
    #[error("CACHE_ERROR: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation was cancelled before its statement started.
    #[error("CANCELLED")]
    Cancelled,

    /// No pooled connection became available in time.
    #[error("POOL_TIMEOUT: no connection released within {0:?}")]
    PoolTimeout(std::time::Duration),

    /// The blocking task running the operation failed.
    #[error("TASK_FAILED: {0}")]
    TaskFailed(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// True when SQLite gave up waiting on another connection's lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Error::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
