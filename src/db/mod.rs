//! Database module for Timekeeper
//!
//! Provides the SQLite connection behind the persistent session store.

pub mod schema;

use crate::error::{CoreError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Single SQLite connection shared by the store
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the database file at `db_path`
    pub fn new(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;

        Ok(Database {
            conn: Mutex::new(conn),
            path: Some(db_path),
        })
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Ok(Database {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        })
    }

    /// Lock the connection for synchronous use
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Storage("database connection lock poisoned".to_string()))
    }

    /// Run `f` against the connection on the blocking thread pool
    pub async fn with_conn<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.conn()?;
            f(&mut *conn)
        })
        .await?
    }

    /// Database file path, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
