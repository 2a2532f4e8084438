//! SQLite schema for the scheduler database.
//!
//! Holds the schedule definitions, the global blocklist and per-package
//! extras. The schema version is stamped into `PRAGMA user_version` with an
//! offset so a foreign database is rejected instead of silently reused.

use anyhow::{bail, Result};
use rusqlite::Connection;

pub const BASE_DB_VERSION: i64 = 77000;
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEDULES: &str = "CREATE TABLE schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 0,
    interval INTEGER NOT NULL DEFAULT 1,
    time_hour INTEGER NOT NULL DEFAULT 0,
    time_minute INTEGER NOT NULL DEFAULT 0,
    time_placed TEXT NOT NULL,
    mode INTEGER NOT NULL DEFAULT 0,
    main_filter INTEGER NOT NULL DEFAULT 0,
    special_filter TEXT NOT NULL,
    block_list TEXT NOT NULL,
    custom_list TEXT NOT NULL,
    tags_list TEXT NOT NULL
)";

const CREATE_BLOCKLIST: &str = "CREATE TABLE blocklist (
    package_name TEXT PRIMARY KEY
)";

const CREATE_APP_EXTRAS: &str = "CREATE TABLE app_extras (
    package_name TEXT PRIMARY KEY,
    custom_tags TEXT NOT NULL,
    note TEXT
)";

const TABLES: &[&str] = &["schedules", "blocklist", "app_extras"];

/// Create all tables on a fresh database and stamp the version.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_SCHEDULES, [])?;
    conn.execute(CREATE_BLOCKLIST, [])?;
    conn.execute(CREATE_APP_EXTRAS, [])?;
    conn.execute("CREATE INDEX idx_schedules_enabled ON schedules(enabled)", [])?;
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + SCHEMA_VERSION),
        [],
    )?;
    Ok(())
}

/// Verify an existing database carries the expected version and tables.
pub fn validate_schema(conn: &Connection) -> Result<()> {
    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let version = raw_version - BASE_DB_VERSION;
    if version != SCHEMA_VERSION {
        bail!(
            "Scheduler database version {} is not supported (expected {})",
            version,
            SCHEMA_VERSION
        );
    }
    for table in TABLES {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !exists {
            bail!("Scheduler database is missing table '{}'", table);
        }
    }
    Ok(())
}
