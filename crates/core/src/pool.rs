//! Connection and command pooling.
//!
//! Opening a connection and preparing a statement dominate the cost of a
//! cache operation, so both are reused:
//!
//! - [`ConnectionPool`] keeps a free list of idle connections. A file-backed
//!   pool opens a new connection when the list is empty instead of waiting;
//!   a memory-only pool is pinned to the one connection that holds the data
//!   and waits for it.
//! - Each connection keeps its own cache of prepared statements keyed by the
//!   operation's SQL. [`command`] takes one out as a [`Command`].
//!
//! Both handles are RAII guards: dropping them, on any path including a
//! panic, returns the resource. A returned command has its bindings cleared;
//! a returned connection with a dangling transaction is rolled back.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::{CachedStatement, Connection};

use crate::config::StoreLocation;
use crate::connection;
use crate::statements::Operation;
use crate::{Error, Result};

/// How the pool gets more connections when the free list is empty.
#[derive(Debug)]
enum Growth {
    /// Open another connection to the file.
    OnDemand(PathBuf),
    /// The seed connection is the only one; wait for it.
    Pinned,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened over the pool's lifetime, including the seed.
    pub opened: usize,
    /// Connections currently idle in the free list.
    pub idle: usize,
}

/// A free list of open connections.
#[derive(Debug)]
pub struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    released: Condvar,
    growth: Growth,
    max_idle: usize,
    busy_timeout: Duration,
    opened: AtomicUsize,
}

impl ConnectionPool {
    /// Build a pool around `seed`, an already configured connection to `location`.
    pub fn new(seed: Connection, location: &StoreLocation, max_idle: usize, busy_timeout: Duration) -> Self {
        let growth = match location {
            StoreLocation::Memory => Growth::Pinned,
            StoreLocation::File(path) => Growth::OnDemand(path.clone()),
        };

        tracing::debug!(?growth, max_idle, "initializing connection pool");

        Self {
            idle: Mutex::new(vec![seed]),
            released: Condvar::new(),
            growth,
            max_idle: max_idle.max(1),
            busy_timeout,
            opened: AtomicUsize::new(1),
        }
    }

    /// Take a connection for the duration of one operation.
    ///
    /// # Errors
    ///
    /// Fails if a new connection cannot be opened, or, for a pinned pool, if
    /// the connection is not released within the busy timeout.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.busy_timeout;
        let mut idle = self.idle.lock();

        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection { pool: self, conn: Some(conn) });
            }

            match &self.growth {
                Growth::OnDemand(path) => {
                    drop(idle);
                    let conn = connection::open_file(path)?;
                    connection::configure(&conn, self.busy_timeout)?;
                    let opened = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(opened, "added a new connection to the pool");
                    return Ok(PooledConnection { pool: self, conn: Some(conn) });
                }
                Growth::Pinned => {
                    if self.released.wait_until(&mut idle, deadline).timed_out() && idle.is_empty() {
                        return Err(Error::PoolTimeout(self.busy_timeout));
                    }
                }
            }
        }
    }

    fn release(&self, conn: Connection) {
        if !conn.is_autocommit() {
            tracing::warn!("rolling back transaction left open on a released connection");
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback on release failed; closing connection");
                if matches!(self.growth, Growth::OnDemand(_)) {
                    return;
                }
            }
        }

        let mut idle = self.idle.lock();
        if matches!(self.growth, Growth::Pinned) || idle.len() < self.max_idle {
            idle.push(conn);
            drop(idle);
            self.released.notify_one();
        } else {
            drop(idle);
            tracing::trace!("idle pool full; closing released connection");
            drop(conn);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats { opened: self.opened.load(Ordering::Relaxed), idle: self.idle.lock().len() }
    }
}

/// A connection on loan from a [`ConnectionPool`]. Returned on drop.
pub struct PooledConnection<'pool> {
    pool: &'pool ConnectionPool,
    conn: Option<Connection>,
}

impl PooledConnection<'_> {
    /// Take the prepared statement for `op` from this connection's cache.
    pub fn command(&self, op: Operation) -> Result<Command<'_>> {
        command(self, op)
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// A prepared statement for one [`Operation`], on loan from its connection's
/// statement cache. Dropping it clears its bindings and puts it back.
pub struct Command<'conn> {
    op: Operation,
    stmt: CachedStatement<'conn>,
}

impl Command<'_> {
    pub fn operation(&self) -> Operation {
        self.op
    }
}

impl<'conn> Deref for Command<'conn> {
    type Target = rusqlite::Statement<'conn>;

    fn deref(&self) -> &Self::Target {
        &self.stmt
    }
}

impl DerefMut for Command<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stmt
    }
}

/// Take the prepared statement for `op` from `conn`'s statement cache,
/// preparing it on first use.
pub fn command(conn: &Connection, op: Operation) -> Result<Command<'_>> {
    let stmt = conn.prepare_cached(op.sql())?;
    Ok(Command { op, stmt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn file_pool(dir: &tempfile::TempDir, max_idle: usize) -> ConnectionPool {
        let location = StoreLocation::File(dir.path().join("pool.db"));
        let seed = schema::open_or_initialize(&location, TIMEOUT).unwrap();
        ConnectionPool::new(seed, &location, max_idle, TIMEOUT)
    }

    fn memory_pool() -> ConnectionPool {
        let seed = schema::open_or_initialize(&StoreLocation::Memory, TIMEOUT).unwrap();
        ConnectionPool::new(seed, &StoreLocation::Memory, 4, TIMEOUT)
    }

    #[test]
    fn test_connection_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 4);

        drop(pool.acquire().unwrap());
        drop(pool.acquire().unwrap());

        assert_eq!(pool.stats(), PoolStats { opened: 1, idle: 1 });
    }

    #[test]
    fn test_grows_on_demand_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 4);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(pool.stats().opened, 3);
        assert_eq!(pool.stats().idle, 0);

        drop((a, b, c));
        assert_eq!(pool.stats().idle, 3);
    }

    #[test]
    fn test_idle_list_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 1);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop((a, b));

        assert_eq!(pool.stats(), PoolStats { opened: 2, idle: 1 });
    }

    #[test]
    fn test_new_connections_see_the_same_data() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 4);

        let writer = pool.acquire().unwrap();
        writer.execute("INSERT INTO cache (key, value) VALUES ('k', x'2a')", []).unwrap();

        let reader = pool.acquire().unwrap();
        let value: Vec<u8> = reader.query_row("SELECT value FROM cache WHERE key = 'k'", [], |r| r.get(0)).unwrap();
        assert_eq!(value, vec![0x2a]);

        let mode: String = reader.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_pinned_pool_times_out() {
        let pool = memory_pool();
        let held = pool.acquire().unwrap();

        let result = pool.acquire();
        assert!(matches!(result, Err(Error::PoolTimeout(_))));
        drop(held);

        assert!(pool.acquire().is_ok());
        assert_eq!(pool.stats().opened, 1);
    }

    #[test]
    fn test_pinned_pool_hands_over_on_release() {
        let pool = Arc::new(memory_pool());
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_released_after_panic() {
        let pool = memory_pool();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _conn = pool.acquire().unwrap();
            panic!("handler failed");
        }));
        assert!(result.is_err());
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn test_open_transaction_rolled_back_on_release() {
        let pool = memory_pool();
        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("BEGIN; INSERT INTO cache (key, value) VALUES ('k', x'00');").unwrap();
        }

        let conn = pool.acquire().unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_command_bindings_do_not_leak() {
        let pool = memory_pool();
        let conn = pool.acquire().unwrap();
        conn.execute("INSERT INTO cache (key, value) VALUES ('k', x'01')", []).unwrap();

        {
            let mut cmd = conn.command(Operation::Get).unwrap();
            let key = cmd.parameter_index(":key").unwrap().unwrap();
            let now = cmd.parameter_index(":now").unwrap().unwrap();
            cmd.raw_bind_parameter(key, "k").unwrap();
            cmd.raw_bind_parameter(now, 0_i64).unwrap();
            // dropped without executing
        }

        let mut cmd = conn.command(Operation::Get).unwrap();
        assert_eq!(cmd.operation(), Operation::Get);
        let mut rows = cmd.raw_query();
        assert!(rows.next().unwrap().is_none());
    }
}
