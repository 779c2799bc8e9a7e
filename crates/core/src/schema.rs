//! On-disk layout, version tag, and the keep-or-rebuild decision.
//!
//! The schema is written once, at initialization, and never migrated. An
//! existing file that does not match it exactly (catalog object count or
//! version) is deleted and rebuilt: the contents are a cache, so losing them
//! is cheaper than trusting a foreign layout.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::config::StoreLocation;
use crate::connection;
use crate::time::Ticks;
use crate::{Error, Result};

/// Version tag written to `meta` at initialization.
pub const SCHEMA_VERSION: i64 = 1;

/// Objects in `sqlite_master`: the `cache` and `meta` tables and the expiry index.
pub const EXPECTED_CATALOG_OBJECTS: i64 = 3;

/// Table layout.
///
/// `cache` is `WITHOUT ROWID` so its primary key does not add an implicit
/// index to the catalog.
pub const SCHEMA_SQL: &str = "
    CREATE TABLE cache (
        key TEXT PRIMARY KEY NOT NULL,
        value BLOB,
        expiry INTEGER NULL,
        renewal INTEGER NULL
    ) WITHOUT ROWID;
    CREATE INDEX cache_expiry ON cache (expiry);
    CREATE TABLE meta (
        key TEXT,
        value INTEGER
    );";

/// Contents of the `meta` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaInfo {
    pub version: i64,
    pub created: Ticks,
}

/// Open the store at `location`, rebuilding an incompatible file.
///
/// The returned connection is configured and holds a valid schema.
pub fn open_or_initialize(location: &StoreLocation, busy_timeout: Duration) -> Result<Connection> {
    match location {
        StoreLocation::Memory => {
            tracing::debug!("opening in-memory cache");
            let mut conn = Connection::open_in_memory()?;
            connection::configure(&conn, busy_timeout)?;
            initialize(&mut conn)?;
            Ok(conn)
        }
        StoreLocation::File(path) => {
            tracing::debug!(cache_path = %path.display(), "opening cache file");

            if path.exists() {
                tracing::trace!(cache_path = %path.display(), "found existing cache file");
                match connection::open_file(path) {
                    Ok(conn) if is_compatible(&conn) => {
                        connection::configure(&conn, busy_timeout)?;
                        return Ok(conn);
                    }
                    Ok(conn) => discard(conn, path)?,
                    Err(e) => {
                        tracing::warn!(cache_path = %path.display(), error = %e, "unable to open existing cache file");
                        remove_files(path)?;
                    }
                }
            }

            let mut conn = connection::open_file(path)?;
            connection::configure(&conn, busy_timeout)?;
            initialize(&mut conn)?;
            Ok(conn)
        }
    }
}

/// Check an existing database against the expected catalog and version.
///
/// Any error while checking counts as incompatible.
pub fn is_compatible(conn: &Connection) -> bool {
    match check(conn) {
        Ok(Compatibility::Ok) => true,
        Ok(Compatibility::WrongCatalog(objects)) => {
            tracing::warn!(
                objects,
                expected = EXPECTED_CATALOG_OBJECTS,
                "incorrect or incompatible existing cache db structure"
            );
            false
        }
        Ok(Compatibility::WrongVersion(version)) => {
            tracing::warn!(schema_version = ?version, "existing cache db has unsupported schema version");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "error while checking compatibility of existing cache db");
            false
        }
    }
}

enum Compatibility {
    Ok,
    WrongCatalog(i64),
    WrongVersion(Option<i64>),
}

fn check(conn: &Connection) -> Result<Compatibility> {
    let objects: i64 = conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))?;
    if objects != EXPECTED_CATALOG_OBJECTS {
        return Ok(Compatibility::WrongCatalog(objects));
    }

    let version: Option<i64> = conn
        .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| row.get(0))
        .optional()?;
    if version != Some(SCHEMA_VERSION) {
        return Ok(Compatibility::WrongVersion(version));
    }

    Ok(Compatibility::Ok)
}

/// Create tables and write the meta rows in one transaction.
pub fn initialize(conn: &mut Connection) -> Result<()> {
    tracing::info!(schema_version = SCHEMA_VERSION, "initializing cache db");

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_SQL)?;
    tx.execute(
        "INSERT INTO meta (key, value) VALUES ('version', ?1), ('created', ?2)",
        params![SCHEMA_VERSION, Ticks::now().0],
    )?;
    tx.commit()?;

    Ok(())
}

/// Read the meta rows back.
pub fn read_info(conn: &Connection) -> Result<SchemaInfo> {
    let mut stmt = conn.prepare("SELECT key, value FROM meta")?;
    let mut rows = stmt.query([])?;

    let mut version = None;
    let mut created = None;
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        match key.as_str() {
            "version" => version = Some(row.get::<_, i64>(1)?),
            "created" => created = Some(Ticks(row.get(1)?)),
            _ => {}
        }
    }

    match (version, created) {
        (Some(version), Some(created)) => Ok(SchemaInfo { version, created }),
        _ => Err(Error::Database(rusqlite::Error::QueryReturnedNoRows)),
    }
}

fn discard(conn: Connection, path: &Path) -> Result<()> {
    if let Err((conn, e)) = conn.close() {
        tracing::warn!(error = %e, "error closing incompatible cache db");
        drop(conn);
    }
    tracing::info!(cache_path = %path.display(), "deleting existing incompatible cache db file");
    remove_files(path)
}

/// Remove the database file and any WAL companions.
fn remove_files(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|e| Error::io(path, e))?;

    for suffix in ["-wal", "-shm"] {
        let mut companion = path.as_os_str().to_owned();
        companion.push(suffix);
        match std::fs::remove_file(&companion) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(companion, e)),
        }
    }
    Ok(())
}
