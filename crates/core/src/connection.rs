//! Opening SQLite connections with pragma configuration.
//!
//! Every connection handed to the pool goes through [`configure`], so the
//! journal mode, sync level, and busy timeout hold no matter which pooled
//! connection runs a statement.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::{Error, Result};

/// Prepared statements kept per connection.
///
/// Covers every catalog operation plus a few bulk remainder shapes.
pub const STATEMENT_CACHE_CAPACITY: usize = 16;

/// Open (or create) the database file at `path`.
///
/// Creates the parent directory if needed.
pub fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    Ok(Connection::open(path)?)
}

/// Apply the pragmas and per-connection settings.
///
/// WAL with `synchronous=NORMAL` trades the last few commits on power loss
/// for much cheaper writes; the file itself stays consistent.
pub fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;

    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

    tracing::trace!(journal_mode = %mode, "configured cache connection");
    Ok(())
}
