//! Storage backend behind the session store.
//!
//! Uses enum dispatch to support multiple backends without trait objects.
//! - `Db` variant: SQLite database with secondary indexes (storage = "db")
//! - `Memory` variant: in-memory linear-scan index (storage = "ephemeral")

use super::memory::MemoryIndex;
use crate::db::{schema, Database};
use crate::error::Result;
use crate::session::{from_millis, to_millis, Session, TimelineMetadata, TIMELINE_METADATA_KEY};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

const SESSION_COLUMNS: &str =
    "id, app_id, account_id, start_time, end_time, achievement_entries, marker_entries";

/// Storage backend used by the session store
pub enum Backend {
    /// SQLite database backend
    Db(Arc<Database>),
    /// In-memory ephemeral backend
    Memory(Arc<MemoryIndex>),
}

impl Backend {
    /// Bring persistent storage to the latest schema. Returns migrations applied.
    pub async fn migrate(&self) -> Result<usize> {
        match self {
            Backend::Db(db) => db.with_conn(|conn| Ok(schema::run_migrations(conn)?)).await,
            Backend::Memory(_) => Ok(0),
        }
    }

    /// Insert a new session, returning its id
    pub async fn insert(&self, session: Session) -> Result<i64> {
        match self {
            Backend::Db(db) => db.with_conn(move |conn| insert_row(conn, &session)).await,
            Backend::Memory(idx) => idx.insert(session),
        }
    }

    /// Insert all sessions in one transaction
    pub async fn insert_batch(&self, sessions: Vec<Session>) -> Result<Vec<i64>> {
        match self {
            Backend::Db(db) => {
                db.with_conn(move |conn| {
                    let tx = conn.transaction()?;
                    let ids = sessions
                        .iter()
                        .map(|s| insert_row(&tx, s))
                        .collect::<Result<Vec<_>>>()?;
                    tx.commit()?;
                    Ok(ids)
                })
                .await
            }
            Backend::Memory(idx) => idx.insert_batch(sessions),
        }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Session>> {
        match self {
            Backend::Db(db) => {
                db.with_conn(move |conn| {
                    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
                    Ok(conn.query_row(&sql, [id], session_from_row).optional()?)
                })
                .await
            }
            Backend::Memory(idx) => idx.get(id),
        }
    }

    /// Every session in storage (id) order
    pub async fn all(&self) -> Result<Vec<Session>> {
        match self {
            Backend::Db(db) => {
                db.with_conn(|conn| {
                    let sql = format!("SELECT {} FROM sessions ORDER BY id", SESSION_COLUMNS);
                    query_sessions(conn, &sql, params![])
                })
                .await
            }
            Backend::Memory(idx) => idx.all(),
        }
    }

    /// Sessions with `start_time >= start` and `end_time <= end`, by start time
    pub async fn by_date_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Session>> {
        match self {
            Backend::Db(db) => {
                db.with_conn(move |conn| {
                    let sql = format!(
                        "SELECT {} FROM sessions
                         WHERE start_time >= ?1 AND end_time <= ?2
                         ORDER BY start_time, id",
                        SESSION_COLUMNS
                    );
                    query_sessions(conn, &sql, params![to_millis(start), to_millis(end)])
                })
                .await
            }
            Backend::Memory(idx) => idx.by_date_range(start, end),
        }
    }

    pub async fn by_app(&self, app_id: &str) -> Result<Vec<Session>> {
        match self {
            Backend::Db(db) => {
                let app_id = app_id.to_string();
                db.with_conn(move |conn| {
                    let sql = format!(
                        "SELECT {} FROM sessions WHERE app_id = ?1 ORDER BY start_time, id",
                        SESSION_COLUMNS
                    );
                    query_sessions(conn, &sql, params![app_id])
                })
                .await
            }
            Backend::Memory(idx) => idx.by_app(app_id),
        }
    }

    pub async fn by_account(&self, account_id: Option<&str>) -> Result<Vec<Session>> {
        match self {
            Backend::Db(db) => {
                let account_id = account_id.map(str::to_string);
                db.with_conn(move |conn| {
                    // `IS` matches NULL for the local user
                    let sql = format!(
                        "SELECT {} FROM sessions WHERE account_id IS ?1 ORDER BY start_time, id",
                        SESSION_COLUMNS
                    );
                    query_sessions(conn, &sql, params![account_id])
                })
                .await
            }
            Backend::Memory(idx) => idx.by_account(account_id),
        }
    }

    /// Overwrite (or create) the record stored at `id`
    pub async fn put(&self, session: Session, id: i64) -> Result<()> {
        match self {
            Backend::Db(db) => {
                db.with_conn(move |conn| {
                    let achievements = serde_json::to_string(&session.achievement_entries)?;
                    let markers = serde_json::to_string(&session.marker_entries)?;
                    conn.execute(
                        "INSERT INTO sessions (
                            id, app_id, account_id, start_time, end_time,
                            achievement_entries, marker_entries
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        ON CONFLICT(id) DO UPDATE SET
                            app_id = ?2,
                            account_id = ?3,
                            start_time = ?4,
                            end_time = ?5,
                            achievement_entries = ?6,
                            marker_entries = ?7",
                        params![
                            id,
                            session.app_id,
                            session.account_id,
                            to_millis(session.start_time),
                            to_millis(session.end_time),
                            achievements,
                            markers,
                        ],
                    )?;
                    Ok(())
                })
                .await
            }
            Backend::Memory(idx) => idx.put(session, id),
        }
    }

    /// Returns whether a record was removed
    pub async fn delete(&self, id: i64) -> Result<bool> {
        match self {
            Backend::Db(db) => {
                db.with_conn(move |conn| Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", [id])? > 0))
                    .await
            }
            Backend::Memory(idx) => idx.delete(id),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        match self {
            Backend::Db(db) => {
                db.with_conn(|conn| {
                    conn.execute("DELETE FROM sessions", [])?;
                    Ok(())
                })
                .await
            }
            Backend::Memory(idx) => idx.clear(),
        }
    }

    pub async fn count(&self) -> Result<usize> {
        match self {
            Backend::Db(db) => {
                db.with_conn(|conn| {
                    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
                    Ok(count as usize)
                })
                .await
            }
            Backend::Memory(idx) => idx.count(),
        }
    }

    pub async fn read_metadata(&self) -> Result<Option<TimelineMetadata>> {
        match self {
            Backend::Db(db) => {
                db.with_conn(|conn| {
                    Ok(conn
                        .query_row(
                            "SELECT last_calculated, optimal_start_hour FROM metadata WHERE key = ?1",
                            [TIMELINE_METADATA_KEY],
                            |row| {
                                Ok(TimelineMetadata {
                                    last_calculated: time_column(row, 0)?,
                                    optimal_start_hour: row.get(1)?,
                                })
                            },
                        )
                        .optional()?)
                })
                .await
            }
            Backend::Memory(idx) => idx.read_metadata(),
        }
    }

    /// Drop the cached metadata so the next read recomputes it
    pub async fn clear_metadata(&self) -> Result<()> {
        match self {
            Backend::Db(db) => {
                db.with_conn(|conn| {
                    conn.execute("DELETE FROM metadata WHERE key = ?1", [TIMELINE_METADATA_KEY])?;
                    Ok(())
                })
                .await
            }
            Backend::Memory(idx) => idx.clear_metadata(),
        }
    }

    pub async fn write_metadata(&self, metadata: TimelineMetadata) -> Result<()> {
        match self {
            Backend::Db(db) => {
                db.with_conn(move |conn| {
                    conn.execute(
                        "INSERT INTO metadata (key, last_calculated, optimal_start_hour)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                            last_calculated = ?2,
                            optimal_start_hour = ?3",
                        params![
                            TIMELINE_METADATA_KEY,
                            to_millis(metadata.last_calculated),
                            metadata.optimal_start_hour,
                        ],
                    )?;
                    Ok(())
                })
                .await
            }
            Backend::Memory(idx) => idx.write_metadata(metadata),
        }
    }
}

/// Insert one row; an explicit id that already exists fails with a constraint error
fn insert_row(conn: &Connection, session: &Session) -> Result<i64> {
    let achievements = serde_json::to_string(&session.achievement_entries)?;
    let markers = serde_json::to_string(&session.marker_entries)?;

    conn.execute(
        "INSERT INTO sessions (
            id, app_id, account_id, start_time, end_time,
            achievement_entries, marker_entries
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session.id,
            session.app_id,
            session.account_id,
            to_millis(session.start_time),
            to_millis(session.end_time),
            achievements,
            markers,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, session_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: Some(row.get(0)?),
        app_id: row.get(1)?,
        account_id: row.get(2)?,
        start_time: time_column(row, 3)?,
        end_time: time_column(row, 4)?,
        achievement_entries: json_column(row, 5)?,
        marker_entries: json_column(row, 6)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let millis: i64 = row.get(idx)?;
    from_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
