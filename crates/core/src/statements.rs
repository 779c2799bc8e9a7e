//! The fixed catalog of SQL statements, one per cache operation.
//!
//! Every statement takes its inputs as bound parameters. Named parameters
//! (`:key`, `:now`, ...) are used for the single-row statements; bulk
//! inserts use positional parameters, with the shared expiry and renewal at
//! `?1` and `?2`.

use std::fmt;

/// Rows per full-size bulk insert statement.
///
/// Keeps a full chunk at `2 + 2 * BULK_CHUNK_ROWS` variables, well under
/// SQLite's default limit of 32766.
pub const BULK_CHUNK_ROWS: usize = 500;

/// A logical cache operation with its own pooled statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Get,
    Refresh,
    Remove,
    RemoveExpired,
    BulkInsert,
    Clear,
}

macro_rules! not_expired {
    () => {
        "(expiry IS NULL OR expiry >= :now)"
    };
}

const INSERT: &str = "INSERT OR REPLACE INTO cache (key, value, expiry, renewal) \
                      VALUES (:key, :value, :expiry, :renewal)";

const GET: &str = concat!("SELECT value, renewal FROM cache WHERE key = :key AND ", not_expired!());

const REFRESH: &str = "UPDATE cache SET expiry = :now + renewal \
                       WHERE key = :key AND expiry >= :now AND renewal IS NOT NULL";

const REMOVE: &str = "DELETE FROM cache WHERE key = :key";

const REMOVE_EXPIRED: &str = concat!("DELETE FROM cache WHERE NOT ", not_expired!());

const CLEAR: &str = "DELETE FROM cache";

const BULK_INSERT_PREFIX: &str = "INSERT OR REPLACE INTO cache (key, value, expiry, renewal) VALUES ";

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Insert,
        Operation::Get,
        Operation::Refresh,
        Operation::Remove,
        Operation::RemoveExpired,
        Operation::BulkInsert,
        Operation::Clear,
    ];

    /// SQL for this operation. Bulk insert returns the full-size chunk statement.
    pub fn sql(self) -> &'static str {
        match self {
            Operation::Insert => INSERT,
            Operation::Get => GET,
            Operation::Refresh => REFRESH,
            Operation::Remove => REMOVE,
            Operation::RemoveExpired => REMOVE_EXPIRED,
            Operation::BulkInsert => full_bulk_insert(),
            Operation::Clear => CLEAR,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "insert",
            Operation::Get => "get",
            Operation::Refresh => "refresh",
            Operation::Remove => "remove",
            Operation::RemoveExpired => "remove_expired",
            Operation::BulkInsert => "bulk_insert",
            Operation::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Multi-row insert for `rows` entries sharing `?1` (expiry) and `?2` (renewal).
pub fn bulk_insert_sql(rows: usize) -> String {
    let mut sql = String::with_capacity(BULK_INSERT_PREFIX.len() + rows * 20);
    sql.push_str(BULK_INSERT_PREFIX);
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        let key = 3 + 2 * row;
        sql.push_str(&format!("(?{key}, ?{}, ?1, ?2)", key + 1));
    }
    sql
}

fn full_bulk_insert() -> &'static str {
    static SQL: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    SQL.get_or_init(|| bulk_insert_sql(BULK_CHUNK_ROWS))
}
