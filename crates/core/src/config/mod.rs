//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (LITECACHE_*)
//! 2. TOML config file (if LITECACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Where the cache database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Private in-memory database, gone when the cache is dropped.
    Memory,
    /// Database file on disk.
    File(PathBuf),
}

/// Cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (LITECACHE_*)
/// 2. TOML config file (if LITECACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keep the cache in memory only. Takes precedence over `cache_path`.
    ///
    /// Set via LITECACHE_MEMORY_ONLY environment variable.
    #[serde(default)]
    pub memory_only: bool,

    /// Path to the SQLite cache file. Must be a bare path, not a connection string.
    ///
    /// Set via LITECACHE_CACHE_PATH environment variable.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Interval between background sweeps of expired entries, in milliseconds.
    /// Unset disables the background evictor.
    ///
    /// Set via LITECACHE_CLEANUP_INTERVAL_MS environment variable.
    #[serde(default)]
    pub cleanup_interval_ms: Option<u64>,

    /// Maximum number of idle connections kept open by the pool.
    ///
    /// Set via LITECACHE_MAX_IDLE_CONNECTIONS environment variable.
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,

    /// How long a connection waits on a locked database, in milliseconds.
    ///
    /// Set via LITECACHE_BUSY_TIMEOUT_MS environment variable.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./litecache.db")
}

fn default_max_idle_connections() -> usize {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_only: false,
            cache_path: default_cache_path(),
            cleanup_interval_ms: None,
            max_idle_connections: default_max_idle_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl CacheConfig {
    /// Configuration for a private in-memory cache.
    pub fn in_memory() -> Self {
        Self { memory_only: true, ..Default::default() }
    }

    /// Configuration for a cache file at `path`.
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self { cache_path: path.as_ref().to_path_buf(), ..Default::default() }
    }

    /// Set the background cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Resolved store location; `memory_only` wins over `cache_path`.
    pub fn location(&self) -> StoreLocation {
        if self.memory_only { StoreLocation::Memory } else { StoreLocation::File(self.cache_path.clone()) }
    }

    /// Cleanup interval as Duration, if the evictor is enabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval_ms.map(Duration::from_millis)
    }

    /// Busy timeout as Duration for SQLite and the pool.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `LITECACHE_`
    /// 2. TOML file from `LITECACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("LITECACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(Env::prefixed("LITECACHE_").ignore(&["config_file"]));

        Self::from_figment(&figment)
    }

    /// Extract and validate configuration from an arbitrary figment.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
