//! SQLite schema for Timekeeper
//!
//! The schema evolves through an ordered list of migrations tracked in
//! `PRAGMA user_version`. Every migration is additive and idempotent: tables
//! and indexes are created only if absent and columns only if missing, so a
//! migration that is re-run against an already-migrated database is a no-op.

use rusqlite::{Connection, Result};

/// Latest schema version
pub const SCHEMA_VERSION: i64 = 3;

struct Migration {
    version: i64,
    description: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "sessions table with app/start/end indexes",
        apply: create_sessions,
    },
    Migration {
        version: 2,
        description: "timeline metadata table",
        apply: create_metadata,
    },
    Migration {
        version: 3,
        description: "account_id column backfilled to NULL",
        apply: backfill_account_id,
    },
];

/// Current schema version of the database
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Bring the database to [`SCHEMA_VERSION`]. Returns how many migrations ran.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Apply pending migrations up to and including `target`.
///
/// Each migration commits in its own transaction together with the version
/// bump, so a failure leaves the database at the last completed version.
pub fn migrate_to(conn: &mut Connection, target: i64) -> Result<usize> {
    let current = schema_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target)
    {
        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;

        tracing::info!(
            version = migration.version,
            "Applied migration: {}",
            migration.description
        );
        applied += 1;
    }

    Ok(applied)
}

fn create_sessions(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            achievement_entries TEXT NOT NULL DEFAULT '[]',
            marker_entries TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_app ON sessions(app_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_end ON sessions(end_time)",
        [],
    )?;

    Ok(())
}

fn create_metadata(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            last_calculated INTEGER NOT NULL,
            optimal_start_hour INTEGER NOT NULL CHECK (optimal_start_hour BETWEEN 0 AND 23)
        )",
        [],
    )?;

    Ok(())
}

fn backfill_account_id(conn: &Connection) -> Result<()> {
    let has_column: bool = conn
        .prepare("SELECT COUNT(*) FROM pragma_table_info('sessions') WHERE name = 'account_id'")?
        .query_row([], |row| row.get::<_, i64>(0))
        .map(|count| count > 0)?;

    if !has_column {
        // Existing rows read back as NULL, the local-user sentinel
        conn.execute("ALTER TABLE sessions ADD COLUMN account_id TEXT", [])?;
    }

    // Older writers stored the local user as an empty string
    let backfilled = conn.execute(
        "UPDATE sessions SET account_id = NULL WHERE account_id = ''",
        [],
    )?;
    if backfilled > 0 {
        tracing::info!(rows = backfilled, "Backfilled account_id to local user");
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id)",
        [],
    )?;

    Ok(())
}
