//! SQLite relation store.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout` from config so a second writer waits instead of failing
//! - `foreign_keys = ON` so stages, states and edges cannot dangle
//!
//! Timestamps are stored as `*_us` integer columns (microseconds since the
//! Unix epoch). Every value handed back to callers is already truncated to
//! that precision so it compares equal to what a later read returns.

pub mod legal_entities;
pub mod migrations;
pub mod peers;
pub mod query;
pub mod schema;
pub mod states;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::{fmt, path::Path, str::FromStr, time::Duration};

use crate::error::RelationError;

/// Busy timeout used when the project config does not set one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the relation store, apply runtime pragmas, and migrate
/// the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails.
pub fn open_store(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create relation store directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open relation store {}", path.display()))?;

    configure_connection(&conn, busy_timeout).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply relation store migrations")?;

    Ok(conn)
}

/// Open a private in-memory store. Used by tests and dry runs.
///
/// # Errors
///
/// Returns an error if the schema cannot be created.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory relation store")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("enable foreign keys")?;
    migrations::migrate(&mut conn).context("apply relation store migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Run `op` inside a `BEGIN IMMEDIATE` transaction.
///
/// The write lock is taken before `op` issues its first read, so two writers
/// working on the same identity serialize instead of racing between lookup
/// and insert. The transaction commits when `op` succeeds and rolls back
/// when it fails.
///
/// # Errors
///
/// Returns the error produced by `op`, or a store error if the transaction
/// cannot be opened or committed.
pub fn immediate<T, E, F>(conn: &Connection, op: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E>,
    E: From<rusqlite::Error> + fmt::Display,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    match op(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(error) => {
            tracing::warn!(%error, "rolling back relation store transaction");
            drop(tx);
            Err(error)
        }
    }
}

/// Current time at storage precision.
#[must_use]
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

pub(crate) fn to_us(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

pub(crate) fn from_us(column: &'static str, micros: i64) -> Result<DateTime<Utc>, RelationError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| RelationError::Corrupt {
        column,
        value: micros.to_string(),
    })
}

/// Parse a persisted enum column, reporting the column on failure.
pub(crate) fn parse_column<T: FromStr>(
    column: &'static str,
    value: String,
) -> Result<T, RelationError> {
    value
        .parse()
        .map_err(|_| RelationError::Corrupt { column, value })
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, from_us, immediate, now, open_store, to_us};
    use crate::db::migrations;
    use crate::error::RelationError;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join(".relgraph").join("relgraph.db");
        (dir, path)
    }

    #[test]
    fn open_store_sets_wal_busy_timeout_and_fk() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path, DEFAULT_BUSY_TIMEOUT).expect("open relation store");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(
            u128::from(busy_timeout_ms),
            DEFAULT_BUSY_TIMEOUT.as_millis()
        );

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn open_store_runs_migrations() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path, DEFAULT_BUSY_TIMEOUT).expect("open relation store");

        let version = migrations::current_schema_version(&conn).expect("schema version query");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn immediate_rolls_back_on_error() {
        let conn = super::open_in_memory().expect("open store");
        let result: Result<(), RelationError> = immediate(&conn, |tx| {
            tx.execute(
                "INSERT INTO legal_entities (bpnl, created_at_us) VALUES ('BPNL-X', 1)",
                [],
            )?;
            Err(RelationError::invalid("abort"))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM legal_entities", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn immediate_commits_on_success() {
        let conn = super::open_in_memory().expect("open store");
        immediate::<_, RelationError, _>(&conn, |tx| {
            tx.execute(
                "INSERT INTO legal_entities (bpnl, created_at_us) VALUES ('BPNL-X', 1)",
                [],
            )?;
            Ok(())
        })
        .expect("commit");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM legal_entities", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn timestamps_roundtrip_at_micro_precision() {
        let instant = now();
        assert_eq!(from_us("t", to_us(instant)).expect("decode"), instant);
        assert!(from_us("t", i64::MAX).is_err());
    }
}
