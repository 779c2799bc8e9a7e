//! Subcommands and their execution against an open cache.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use litecache_core::{CancellationToken, EntryOptions, SqliteCache, StoreLocation};
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value stored under KEY
    Get { key: String },

    /// Store VALUE under KEY
    Set {
        key: String,
        value: String,
        #[command(flatten)]
        expiry: ExpiryArgs,
    },

    /// Delete KEY
    Remove { key: String },

    /// Extend a sliding entry without reading it
    Refresh { key: String },

    /// Delete all expired entries
    Purge,

    /// Delete all entries
    Clear,

    /// Bulk load `key=value` lines from FILE
    Import {
        file: PathBuf,
        #[command(flatten)]
        expiry: ExpiryArgs,
    },

    /// Print schema and row counts as JSON
    Info,
}

#[derive(clap::Args, Debug, Default)]
pub struct ExpiryArgs {
    /// Expire this many seconds after the write
    #[arg(long, value_name = "SECS")]
    ttl: Option<u64>,

    /// Expire at a fixed RFC 3339 time
    #[arg(long, value_name = "TIME")]
    expires_at: Option<DateTime<Utc>>,

    /// Expire after this many idle seconds
    #[arg(long, value_name = "SECS")]
    sliding: Option<u64>,
}

impl ExpiryArgs {
    fn options(&self) -> EntryOptions {
        EntryOptions {
            absolute_expiration: self.expires_at,
            absolute_expiration_relative_to_now: self.ttl.map(Duration::from_secs),
            sliding_expiration: self.sliding.map(Duration::from_secs),
        }
    }
}

#[derive(Serialize, Debug)]
struct InfoReport {
    location: String,
    schema_version: i64,
    created: Option<DateTime<Utc>>,
    entries: u64,
    expired: u64,
}

/// Execute `command` and return what should be printed.
pub async fn run(cache: &SqliteCache, command: Command) -> Result<String> {
    let cancel = CancellationToken::new();

    let output = match command {
        Command::Get { key } => match cache.get_async(&key, &cancel).await? {
            Some(value) => String::from_utf8_lossy(&value).into_owned(),
            None => bail!("key not found: {key}"),
        },
        Command::Set { key, value, expiry } => {
            cache.set_async(&key, value.as_bytes(), &expiry.options(), &cancel).await?;
            String::new()
        }
        Command::Remove { key } => {
            if !cache.remove_async(&key, &cancel).await? {
                bail!("key not found: {key}");
            }
            String::new()
        }
        Command::Refresh { key } => {
            let extended = cache.refresh_async(&key, &cancel).await?;
            tracing::debug!(key = %key, extended, "refresh");
            String::new()
        }
        Command::Purge => cache.remove_expired_async(&cancel).await?.to_string(),
        Command::Clear => cache.clear_async(&cancel).await?.to_string(),
        Command::Import { file, expiry } => {
            let contents =
                std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let entries = parse_import(&contents)?;
            let count = entries.len();
            cache.set_bulk_async(entries, &expiry.options(), &cancel).await?;
            count.to_string()
        }
        Command::Info => {
            let info = cache.info_async(&cancel).await?;
            let location = match cache.location() {
                StoreLocation::Memory => ":memory:".to_string(),
                StoreLocation::File(path) => path.display().to_string(),
            };
            let report = InfoReport {
                location,
                schema_version: info.schema.version,
                created: info.schema.created.to_datetime(),
                entries: info.entries,
                expired: info.expired,
            };
            serde_json::to_string_pretty(&report)?
        }
    };

    Ok(output)
}

/// Parse `key=value` lines. Blank lines and `#` comments are skipped; the
/// first `=` splits, so values may contain `=`.
fn parse_import(contents: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let mut entries = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            bail!("line {}: expected key=value", index + 1);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("line {}: empty key", index + 1);
        }
        entries.push((key.to_string(), value.as_bytes().to_vec()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use litecache_core::CacheConfig;

    fn open(dir: &tempfile::TempDir) -> SqliteCache {
        SqliteCache::open(CacheConfig::at_path(dir.path().join("cli.db"))).unwrap()
    }

    #[test]
    fn test_parse_import() {
        let entries = parse_import("# header\n\nalpha=1\n  beta = two=2\n").unwrap();
        assert_eq!(
            entries,
            vec![("alpha".to_string(), b"1".to_vec()), ("beta".to_string(), b" two=2".to_vec())]
        );
    }

    #[test]
    fn test_parse_import_rejects_bad_lines() {
        let err = parse_import("ok=1\nnope\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_import("=value").is_err());
    }

    #[test]
    fn test_expiry_args_map_to_options() {
        let args = ExpiryArgs { ttl: Some(30), expires_at: None, sliding: Some(5) };
        let options = args.options();
        assert_eq!(options.absolute_expiration_relative_to_now, Some(Duration::from_secs(30)));
        assert_eq!(options.sliding_expiration, Some(Duration::from_secs(5)));
        assert_eq!(ExpiryArgs::default().options(), EntryOptions::new());
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);

        let set = Command::Set { key: "k".into(), value: "hello".into(), expiry: ExpiryArgs::default() };
        assert_eq!(run(&cache, set).await.unwrap(), "");
        assert_eq!(run(&cache, Command::Get { key: "k".into() }).await.unwrap(), "hello");
        run(&cache, Command::Remove { key: "k".into() }).await.unwrap();
        assert!(run(&cache, Command::Get { key: "k".into() }).await.is_err());
    }

    #[tokio::test]
    async fn test_import_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir);
        let file = dir.path().join("seed.txt");
        std::fs::write(&file, "a=1\nb=2\nc=3\n").unwrap();

        let imported = run(&cache, Command::Import { file, expiry: ExpiryArgs::default() }).await.unwrap();
        assert_eq!(imported, "3");

        let report: serde_json::Value = serde_json::from_str(&run(&cache, Command::Info).await.unwrap()).unwrap();
        assert_eq!(report["entries"], 3);
        assert_eq!(report["expired"], 0);
        assert_eq!(report["schema_version"], 1);

        assert_eq!(run(&cache, Command::Clear).await.unwrap(), "3");
        assert_eq!(run(&cache, Command::Purge).await.unwrap(), "0");
    }
}
