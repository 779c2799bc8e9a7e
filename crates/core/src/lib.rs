//! Persistent key-value cache on an embedded SQLite database.
//!
//! This crate provides:
//! - [`SqliteCache`], byte values under string keys with absolute and sliding expiry
//! - Pooled connections and prepared statements
//! - Sessions batching writes in one transaction
//! - A background evictor for expired entries
//! - Layered configuration and unified error types

pub mod cache;
pub mod config;
pub mod connection;
pub mod distributed;
pub mod error;
mod evictor;
pub mod expiry;
pub mod pool;
pub mod schema;
pub mod session;
pub mod statements;
pub mod time;

pub use cache::{CacheInfo, SqliteCache};
pub use config::{CacheConfig, ConfigError, StoreLocation};
pub use distributed::{AsyncDistributedCache, DistributedCache};
pub use error::{Error, Result};
pub use expiry::{EntryOptions, Expiry};
pub use session::CacheSession;
pub use time::{TickSpan, Ticks};
pub use tokio_util::sync::CancellationToken;
