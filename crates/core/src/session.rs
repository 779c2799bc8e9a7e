//! Batched writes in one transaction.
//!
//! A [`CacheSession`] holds one pooled connection inside `BEGIN IMMEDIATE`
//! until it is committed, rolled back, or dropped. Dropping commits.
//!
//! While a session is open it owns the write lock. Writers on other
//! connections wait up to the busy timeout; on a memory-only cache every
//! other operation waits for the single connection, bounded the same way.

use rusqlite::Connection;

use crate::cache::{self, SqliteCache};
use crate::expiry::EntryOptions;
use crate::pool::PooledConnection;
use crate::time::Ticks;
use crate::{Error, Result};

/// An open write transaction against a [`SqliteCache`].
pub struct CacheSession<'cache> {
    conn: Option<PooledConnection<'cache>>,
}

impl SqliteCache {
    /// Start a session. Operations on it share one transaction.
    pub fn session(&self) -> Result<CacheSession<'_>> {
        let conn = self.inner().pool.acquire()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        tracing::trace!("cache session started");
        Ok(CacheSession { conn: Some(conn) })
    }
}

impl CacheSession<'_> {
    fn conn(&self) -> Result<&Connection> {
        self.conn.as_deref().ok_or_else(|| Error::InvalidInput("session already finished".to_string()))
    }

    pub fn set(&self, key: &str, value: &[u8], options: &EntryOptions) -> Result<()> {
        let expiry = options.resolve(Ticks::now())?;
        cache::set(self.conn()?, key, value, expiry)
    }

    /// Bulk write nested in the session's transaction. A failed batch leaves
    /// earlier session writes intact.
    pub fn set_bulk<K, V>(&mut self, entries: &[(K, V)], options: &EntryOptions) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        if entries.is_empty() {
            return Ok(());
        }
        let expiry = options.resolve(Ticks::now())?;
        let conn = self
            .conn
            .as_deref_mut()
            .ok_or_else(|| Error::InvalidInput("session already finished".to_string()))?;
        cache::set_bulk(conn, entries, expiry)
    }

    /// Reads see the session's own uncommitted writes.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        cache::get(self.conn()?, key)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        cache::remove(self.conn()?, key)
    }

    pub fn refresh(&self, key: &str) -> Result<bool> {
        cache::refresh(self.conn()?, key)
    }

    pub fn commit(mut self) -> Result<()> {
        self.finish("COMMIT")
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn finish(&mut self, sql: &str) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.execute_batch(sql)?;
        tracing::trace!(outcome = sql, "cache session finished");
        Ok(())
    }
}

impl Drop for CacheSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish("COMMIT") {
            tracing::warn!(error = %e, "failed to commit cache session on drop");
        }
    }
}
