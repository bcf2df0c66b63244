//! Ephemeral in-memory storage backend.
//!
//! Volatile session storage when `storage = "ephemeral"`. All data is lost on
//! restart. Queries are linear scans over an id-ordered map and return the
//! same results, in the same order, as the SQLite backend.

use crate::error::{CoreError, Result};
use crate::session::{Session, TimelineMetadata};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    sessions: BTreeMap<i64, Session>,
    /// Highest id ever handed out, never reused (AUTOINCREMENT semantics)
    last_id: i64,
    metadata: Option<TimelineMetadata>,
}

impl Tables {
    fn insert(&mut self, mut session: Session) -> Result<i64> {
        let id = match session.id {
            Some(id) if self.sessions.contains_key(&id) => {
                return Err(CoreError::Storage(format!(
                    "session with id {} already exists",
                    id
                )));
            }
            Some(id) => id,
            None => self.last_id + 1,
        };
        self.last_id = self.last_id.max(id);
        session.id = Some(id);
        self.sessions.insert(id, session);
        Ok(id)
    }
}

/// In-memory session index
#[derive(Debug, Default)]
pub struct MemoryIndex {
    tables: Mutex<Tables>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| CoreError::Storage("memory index lock poisoned".to_string()))
    }

    pub fn insert(&self, session: Session) -> Result<i64> {
        self.tables()?.insert(session)
    }

    /// Insert every session or none.
    ///
    /// The batch is applied to a staged copy that replaces the live tables
    /// only after every insert succeeded.
    pub fn insert_batch(&self, sessions: Vec<Session>) -> Result<Vec<i64>> {
        let mut tables = self.tables()?;
        let mut staged = tables.clone();
        let ids = sessions
            .into_iter()
            .map(|s| staged.insert(s))
            .collect::<Result<Vec<_>>>()?;
        *tables = staged;
        Ok(ids)
    }

    pub fn get(&self, id: i64) -> Result<Option<Session>> {
        Ok(self.tables()?.sessions.get(&id).cloned())
    }

    pub fn all(&self) -> Result<Vec<Session>> {
        Ok(self.tables()?.sessions.values().cloned().collect())
    }

    /// Sessions fully contained in `[start, end]`, ordered by start time
    pub fn by_date_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<Session>> {
        self.scan(|s| s.start_time >= start && s.end_time <= end)
    }

    pub fn by_app(&self, app_id: &str) -> Result<Vec<Session>> {
        self.scan(|s| s.app_id == app_id)
    }

    pub fn by_account(&self, account_id: Option<&str>) -> Result<Vec<Session>> {
        self.scan(|s| s.account_id.as_deref() == account_id)
    }

    fn scan<F>(&self, predicate: F) -> Result<Vec<Session>>
    where
        F: Fn(&Session) -> bool,
    {
        let mut found: Vec<Session> = self
            .tables()?
            .sessions
            .values()
            .filter(|s| predicate(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.start_time, s.id));
        Ok(found)
    }

    /// Insert or overwrite the record at `session.id`
    pub fn put(&self, session: Session, id: i64) -> Result<()> {
        let mut tables = self.tables()?;
        tables.last_id = tables.last_id.max(id);
        tables.sessions.insert(id, Session { id: Some(id), ..session });
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.tables()?.sessions.remove(&id).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        self.tables()?.sessions.clear();
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.tables()?.sessions.len())
    }

    pub fn read_metadata(&self) -> Result<Option<TimelineMetadata>> {
        Ok(self.tables()?.metadata)
    }

    pub fn clear_metadata(&self) -> Result<()> {
        self.tables()?.metadata = None;
        Ok(())
    }

    pub fn write_metadata(&self, metadata: TimelineMetadata) -> Result<()> {
        self.tables()?.metadata = Some(metadata);
        Ok(())
    }
}
