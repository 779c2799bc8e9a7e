//! The cache engine.
//!
//! Every operation follows the same shape: acquire a pooled connection, take
//! the operation's prepared command, bind, execute, release. The blocking
//! forms do this on the caller's thread; the `_async` forms move it onto
//! tokio's blocking pool.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, named_params};
use tokio_util::sync::CancellationToken;

use crate::config::{CacheConfig, StoreLocation};
use crate::evictor::Evictor;
use crate::expiry::{EntryOptions, Expiry};
use crate::pool::{ConnectionPool, PoolStats, command};
use crate::schema::{self, SchemaInfo};
use crate::statements::{BULK_CHUNK_ROWS, Operation, bulk_insert_sql};
use crate::time::Ticks;
use crate::{Error, Result};

/// Summary of a cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub schema: SchemaInfo,
    /// All rows, including expired ones not yet swept.
    pub entries: u64,
    /// Rows whose expiry has passed.
    pub expired: u64,
}

/// Persistent key-value cache backed by SQLite.
///
/// Not `Clone`; share it behind an `Arc`. Dropping it stops the background
/// evictor. The connection pool lives until the last in-flight async
/// operation finishes with it.
#[derive(Debug)]
pub struct SqliteCache {
    inner: Arc<CacheInner>,
    evictor: Option<Evictor>,
}

#[derive(Debug)]
pub(crate) struct CacheInner {
    pub(crate) pool: ConnectionPool,
    location: StoreLocation,
}

impl SqliteCache {
    /// Open (or create) the cache described by `config`.
    ///
    /// Validates the configuration before touching storage, rebuilds an
    /// incompatible existing file, and starts the background evictor if a
    /// cleanup interval is set.
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let location = config.location();
        let seed = schema::open_or_initialize(&location, config.busy_timeout())?;
        let pool = ConnectionPool::new(seed, &location, config.max_idle_connections, config.busy_timeout());
        let inner = Arc::new(CacheInner { pool, location });

        let evictor = match config.cleanup_interval() {
            Some(interval) => Some(Evictor::spawn(Arc::clone(&inner), interval)?),
            None => None,
        };

        Ok(Self { inner, evictor })
    }

    /// Open without blocking the calling task.
    pub async fn open_async(config: CacheConfig) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(config)).await?
    }

    /// Open a private in-memory cache.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(CacheConfig::in_memory())
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Whether a background evictor is running.
    pub fn has_evictor(&self) -> bool {
        self.evictor.is_some()
    }

    /// Stop the evictor and release this handle.
    pub fn close(mut self) {
        if let Some(evictor) = self.evictor.take() {
            evictor.stop();
        }
    }

    pub(crate) fn inner(&self) -> &CacheInner {
        &self.inner
    }

    /// Value for `key`, if present and not expired. Extends sliding entries.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    /// Insert or fully replace `key`.
    pub fn set(&self, key: &str, value: &[u8], options: &EntryOptions) -> Result<()> {
        self.inner.set(key, value, options)
    }

    /// Remove `key`. Returns whether a row was deleted.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key)
    }

    /// Extend a live sliding entry. Returns whether an entry was extended.
    pub fn refresh(&self, key: &str) -> Result<bool> {
        self.inner.refresh(key)
    }

    /// Delete every expired row. Returns the number deleted.
    pub fn remove_expired(&self) -> Result<usize> {
        self.inner.remove_expired()
    }

    /// Insert or replace many entries sharing one set of options.
    ///
    /// All-or-nothing. An empty batch is a no-op.
    pub fn set_bulk<K, V>(&self, entries: &[(K, V)], options: &EntryOptions) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        self.inner.set_bulk(entries, options)
    }

    /// Delete every row. Returns the number deleted.
    pub fn clear(&self) -> Result<usize> {
        self.inner.clear()
    }

    /// Stored expiry of `key`, expired or not.
    pub fn expiry_of(&self, key: &str) -> Result<Option<Expiry>> {
        self.inner.expiry_of(key)
    }

    pub fn info(&self) -> Result<CacheInfo> {
        self.inner.info()
    }

    /// Run `op` on the blocking pool.
    ///
    /// Cancellation is weak: a token cancelled before the statement starts
    /// prevents it from running and yields [`Error::Cancelled`]; once it has
    /// started it runs to completion.
    async fn run_blocking<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CacheInner) -> Result<T> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            op(&inner)
        })
        .await?
    }

    pub async fn get_async(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run_blocking(cancel, move |inner| inner.get(&key)).await
    }

    pub async fn set_async(
        &self, key: &str, value: &[u8], options: &EntryOptions, cancel: &CancellationToken,
    ) -> Result<()> {
        let key = key.to_string();
        let value = value.to_vec();
        let options = options.clone();
        self.run_blocking(cancel, move |inner| inner.set(&key, &value, &options))
            .await
    }

    pub async fn remove_async(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let key = key.to_string();
        self.run_blocking(cancel, move |inner| inner.remove(&key)).await
    }

    pub async fn refresh_async(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let key = key.to_string();
        self.run_blocking(cancel, move |inner| inner.refresh(&key)).await
    }

    pub async fn remove_expired_async(&self, cancel: &CancellationToken) -> Result<usize> {
        self.run_blocking(cancel, |inner| inner.remove_expired()).await
    }

    pub async fn set_bulk_async(
        &self, entries: Vec<(String, Vec<u8>)>, options: &EntryOptions, cancel: &CancellationToken,
    ) -> Result<()> {
        let options = options.clone();
        self.run_blocking(cancel, move |inner| inner.set_bulk(&entries, &options))
            .await
    }

    pub async fn clear_async(&self, cancel: &CancellationToken) -> Result<usize> {
        self.run_blocking(cancel, |inner| inner.clear()).await
    }

    pub async fn info_async(&self, cancel: &CancellationToken) -> Result<CacheInfo> {
        self.run_blocking(cancel, |inner| inner.info()).await
    }
}

impl CacheInner {
    pub(crate) fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.acquire()?;
        get(&conn, key)
    }

    pub(crate) fn set(&self, key: &str, value: &[u8], options: &EntryOptions) -> Result<()> {
        let expiry = options.resolve(Ticks::now())?;
        let conn = self.pool.acquire()?;
        set(&conn, key, value, expiry)
    }

    pub(crate) fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.pool.acquire()?;
        remove(&conn, key)
    }

    pub(crate) fn refresh(&self, key: &str) -> Result<bool> {
        let conn = self.pool.acquire()?;
        refresh(&conn, key)
    }

    pub(crate) fn remove_expired(&self) -> Result<usize> {
        let conn = self.pool.acquire()?;
        let removed = remove_expired(&conn)?;
        if removed > 0 {
            tracing::debug!(removed, "evicted expired entries from cache");
        }
        Ok(removed)
    }

    pub(crate) fn set_bulk<K, V>(&self, entries: &[(K, V)], options: &EntryOptions) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        if entries.is_empty() {
            return Ok(());
        }
        let expiry = options.resolve(Ticks::now())?;
        let mut conn = self.pool.acquire()?;
        set_bulk(&mut conn, entries, expiry)
    }

    pub(crate) fn clear(&self) -> Result<usize> {
        let conn = self.pool.acquire()?;
        Ok(command(&conn, Operation::Clear)?.execute([])?)
    }

    fn expiry_of(&self, key: &str) -> Result<Option<Expiry>> {
        let conn = self.pool.acquire()?;
        let columns = conn
            .prepare_cached("SELECT expiry, renewal FROM cache WHERE key = ?1")?
            .query_row([key], |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)))
            .optional()?;

        Ok(columns.and_then(|(expiry, renewal)| {
            let decoded = Expiry::from_columns(expiry, renewal);
            if decoded.is_none() {
                tracing::warn!(key, "cache row has a renewal without an expiry");
            }
            decoded
        }))
    }

    fn info(&self) -> Result<CacheInfo> {
        let conn = self.pool.acquire()?;
        let schema = schema::read_info(&conn)?;
        let (entries, expired) = conn.query_row(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE expiry IS NOT NULL AND expiry < ?1) FROM cache",
            [Ticks::now().0],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(CacheInfo { schema, entries: entries as u64, expired: expired as u64 })
    }
}

// Operation bodies, shared by the engine and by sessions.

/// Plain rows are read without taking the write lock. A live sliding row is
/// extended and re-read under `BEGIN IMMEDIATE`, or inside the caller's
/// transaction when one is already open.
pub(crate) fn get(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
    let now = Ticks::now().0;

    match read_live(conn, key, now)? {
        Some((_, Some(_))) => extend_and_read(conn, key, now),
        Some((value, None)) => Ok(Some(value)),
        None => Ok(None),
    }
}

fn read_live(conn: &Connection, key: &str, now: i64) -> Result<Option<(Vec<u8>, Option<i64>)>> {
    let row = command(conn, Operation::Get)?
        .query_row(named_params! { ":key": key, ":now": now }, |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    Ok(row)
}

fn extend_and_read(conn: &Connection, key: &str, now: i64) -> Result<Option<Vec<u8>>> {
    let owns_tx = conn.is_autocommit();
    if owns_tx {
        conn.execute_batch("BEGIN IMMEDIATE")?;
    }

    let result = renew_and_read(conn, key, now);

    if owns_tx {
        match &result {
            Ok(_) => conn.execute_batch("COMMIT")?,
            Err(_) => {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %e, "failed to roll back sliding renewal");
                }
            }
        }
    }
    result
}

fn renew_and_read(conn: &Connection, key: &str, now: i64) -> Result<Option<Vec<u8>>> {
    command(conn, Operation::Refresh)?.execute(named_params! { ":key": key, ":now": now })?;
    Ok(read_live(conn, key, now)?.map(|(value, _)| value))
}

pub(crate) fn set(conn: &Connection, key: &str, value: &[u8], expiry: Expiry) -> Result<()> {
    let (expiry, renewal) = expiry.columns();
    command(conn, Operation::Insert)?.execute(named_params! {
        ":key": key,
        ":value": value,
        ":expiry": expiry,
        ":renewal": renewal,
    })?;
    Ok(())
}

pub(crate) fn remove(conn: &Connection, key: &str) -> Result<bool> {
    let removed = command(conn, Operation::Remove)?.execute(named_params! { ":key": key })?;
    Ok(removed > 0)
}

pub(crate) fn refresh(conn: &Connection, key: &str) -> Result<bool> {
    let updated =
        command(conn, Operation::Refresh)?.execute(named_params! { ":key": key, ":now": Ticks::now().0 })?;
    Ok(updated > 0)
}

pub(crate) fn remove_expired(conn: &Connection) -> Result<usize> {
    Ok(command(conn, Operation::RemoveExpired)?.execute(named_params! { ":now": Ticks::now().0 })?)
}

/// Write `entries` in full-size chunks plus one remainder statement, inside
/// a savepoint so the batch lands atomically whether or not a session
/// transaction is already open.
pub(crate) fn set_bulk<K, V>(conn: &mut Connection, entries: &[(K, V)], expiry: Expiry) -> Result<()>
where
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    if entries.is_empty() {
        return Ok(());
    }

    let (expiry, renewal) = expiry.columns();
    let sp = conn.savepoint()?;

    let mut chunks = entries.chunks_exact(BULK_CHUNK_ROWS);
    for chunk in &mut chunks {
        let mut cmd = command(&sp, Operation::BulkInsert)?;
        bind_bulk(&mut cmd, chunk, expiry, renewal)?;
        cmd.raw_execute()?;
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut stmt = sp.prepare(&bulk_insert_sql(remainder.len()))?;
        bind_bulk(&mut stmt, remainder, expiry, renewal)?;
        stmt.raw_execute()?;
    }

    sp.commit()?;
    tracing::trace!(entries = entries.len(), "bulk insert committed");
    Ok(())
}

fn bind_bulk<K, V>(
    stmt: &mut rusqlite::Statement<'_>, rows: &[(K, V)], expiry: Option<i64>, renewal: Option<i64>,
) -> Result<()>
where
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    stmt.raw_bind_parameter(1, expiry)?;
    stmt.raw_bind_parameter(2, renewal)?;
    for (i, (key, value)) in rows.iter().enumerate() {
        stmt.raw_bind_parameter(3 + 2 * i, key.as_ref())?;
        stmt.raw_bind_parameter(4 + 2 * i, value.as_ref())?;
    }
    Ok(())
}
