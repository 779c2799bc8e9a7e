//! litecache command line entry point.
//!
//! Administers a cache file from the shell. Logging goes to stderr so command
//! output on stdout stays scriptable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use litecache_core::{CacheConfig, SqliteCache};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Command;

#[derive(Parser, Debug)]
#[command(name = "litecache")]
#[command(about = "Inspect and edit a litecache SQLite cache file", long_about = None)]
struct Args {
    /// Cache file path. Overrides LITECACHE_CACHE_PATH and the config file.
    #[arg(short, long)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();

    let mut config = CacheConfig::load().context("failed to load cache configuration")?;
    if let Some(path) = args.path {
        config.cache_path = path;
        config.memory_only = false;
    }
    // one-shot process; a background sweep would never get to run
    config.cleanup_interval_ms = None;

    tracing::debug!(location = ?config.location(), "opening cache");
    let cache = SqliteCache::open_async(config).await.context("failed to open cache")?;

    let output = commands::run(&cache, args.command).await?;
    if !output.is_empty() {
        println!("{output}");
    }

    cache.close();
    Ok(())
}
