//! Session store
//!
//! Durable keyed collection of sessions plus the cached timeline metadata.
//! Every committed mutation runs the same chain under one write lock:
//! write → recompute optimal start hour → persist metadata → notify listeners.
//! Listeners therefore never observe sessions and metadata out of step.

pub mod backend;
pub mod memory;

use crate::config::{Config, StorageMode};
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::notify::{ChangeBus, Subscription};
use crate::optimal_hour::calculate_optimal_start_hour;
use crate::session::{Session, TimelineMetadata};
use backend::Backend;
use chrono::NaiveDateTime;
use futures::Stream;
use memory::MemoryIndex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Where the store keeps its data
#[derive(Debug, Clone)]
pub enum StoreLocation {
    /// SQLite file, survives restarts
    File(PathBuf),
    /// Private SQLite database in memory
    SqliteInMemory,
    /// Linear-scan in-memory index
    Ephemeral,
}

impl StoreLocation {
    async fn open(&self) -> Result<Backend> {
        match self {
            StoreLocation::File(path) => {
                let path = path.clone();
                let db = tokio::task::spawn_blocking(move || Database::new(path)).await??;
                Ok(Backend::Db(Arc::new(db)))
            }
            StoreLocation::SqliteInMemory => Ok(Backend::Db(Arc::new(Database::in_memory()?))),
            StoreLocation::Ephemeral => Ok(Backend::Memory(Arc::new(MemoryIndex::new()))),
        }
    }
}

/// Session store with change notification.
///
/// Construct once at startup and share by reference (or `Arc`) with every
/// consumer. Nothing is opened until [`SessionStore::initialize`] runs.
pub struct SessionStore {
    location: StoreLocation,
    /// Inserted once into an empty store during initialization
    seed: Option<Vec<Session>>,
    backend: OnceCell<Backend>,
    write_lock: Mutex<()>,
    bus: ChangeBus,
}

impl SessionStore {
    pub fn new(location: StoreLocation) -> Self {
        SessionStore {
            location,
            seed: None,
            backend: OnceCell::new(),
            write_lock: Mutex::new(()),
            bus: ChangeBus::new(),
        }
    }

    /// Build an uninitialized store from configuration
    pub fn from_config(config: &Config) -> Self {
        let location = match config.storage {
            StorageMode::Db => StoreLocation::File(config.db_path()),
            StorageMode::Ephemeral => StoreLocation::Ephemeral,
        };
        let store = SessionStore::new(location);
        if config.seed_demo {
            let today = chrono::Local::now().date_naive();
            store.with_seed(crate::demo::demo_sessions(today))
        } else {
            store
        }
    }

    /// Sessions to insert when initialization finds the store empty
    pub fn with_seed(mut self, sessions: Vec<Session>) -> Self {
        self.seed = Some(sessions);
        self
    }

    /// Open storage, migrate the schema and run the one-time seed.
    ///
    /// Idempotent: concurrent and repeated calls share a single run.
    pub async fn initialize(&self) -> Result<()> {
        self.backend
            .get_or_try_init(|| async {
                let backend = self.location.open().await?;
                let applied = backend.migrate().await?;
                tracing::info!(location = ?self.location, migrations = applied, "Session store opened");

                if let Some(seed) = &self.seed {
                    if backend.count().await? == 0 {
                        let ids = backend.insert_batch(seed.clone()).await?;
                        tracing::info!(sessions = ids.len(), "Seeded demo sessions");
                        recompute(&backend).await?;
                    }
                }

                Ok::<_, CoreError>(backend)
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    fn backend(&self) -> Result<&Backend> {
        self.backend.get().ok_or(CoreError::NotInitialized)
    }

    /// Persist a new session and return its id
    pub async fn add_session(&self, session: Session) -> Result<i64> {
        let backend = self.backend()?;
        let _guard = self.write_lock.lock().await;

        let id = backend.insert(session).await?;
        tracing::debug!(id, "Added session");

        self.after_mutation(backend).await?;
        Ok(id)
    }

    /// Persist all sessions atomically; one recompute and one notification
    pub async fn add_sessions(&self, sessions: Vec<Session>) -> Result<Vec<i64>> {
        let backend = self.backend()?;
        let _guard = self.write_lock.lock().await;

        let ids = backend.insert_batch(sessions).await?;
        tracing::debug!(count = ids.len(), "Added session batch");

        self.after_mutation(backend).await?;
        Ok(ids)
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<Session>> {
        self.backend()?.get(id).await
    }

    /// All sessions in storage order
    pub async fn get_all_sessions(&self) -> Result<Vec<Session>> {
        self.backend()?.all().await
    }

    /// Sessions fully contained in `[start, end]`, ordered by start time.
    ///
    /// Sessions that only overlap the range are not returned; see
    /// [`crate::timeline`] for the client-side overlap filter.
    pub async fn get_sessions_by_date_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Session>> {
        self.backend()?.by_date_range(start, end).await
    }

    pub async fn get_sessions_by_app(&self, app_id: &str) -> Result<Vec<Session>> {
        self.backend()?.by_app(app_id).await
    }

    /// Sessions for one friend, or for the local user with `None`
    pub async fn get_sessions_by_account(&self, account_id: Option<&str>) -> Result<Vec<Session>> {
        self.backend()?.by_account(account_id).await
    }

    /// Overwrite the full record at `session.id`
    pub async fn update_session(&self, session: Session) -> Result<()> {
        let backend = self.backend()?;
        let id = session.id.ok_or_else(|| {
            CoreError::InvalidArgument("cannot update a session without an id".to_string())
        })?;
        let _guard = self.write_lock.lock().await;

        backend.put(session, id).await?;
        tracing::debug!(id, "Updated session");

        self.after_mutation(backend).await
    }

    pub async fn delete_session(&self, id: i64) -> Result<()> {
        let backend = self.backend()?;
        let _guard = self.write_lock.lock().await;

        let removed = backend.delete(id).await?;
        tracing::debug!(id, removed, "Deleted session");

        self.after_mutation(backend).await
    }

    pub async fn clear_all_sessions(&self) -> Result<()> {
        let backend = self.backend()?;
        let _guard = self.write_lock.lock().await;

        backend.clear().await?;
        tracing::info!("Cleared all sessions");

        self.after_mutation(backend).await
    }

    pub async fn get_session_count(&self) -> Result<usize> {
        self.backend()?.count().await
    }

    /// Cached optimal start hour, computed on first use
    pub async fn get_optimal_start_hour(&self) -> Result<u8> {
        Ok(self.get_timeline_metadata().await?.optimal_start_hour)
    }

    /// Cached timeline metadata, computed and stored on first use
    pub async fn get_timeline_metadata(&self) -> Result<TimelineMetadata> {
        let backend = self.backend()?;
        if let Some(metadata) = backend.read_metadata().await? {
            return Ok(metadata);
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have filled it while we waited
        if let Some(metadata) = backend.read_metadata().await? {
            return Ok(metadata);
        }
        recompute(backend).await
    }

    /// Recompute from the full history and persist; does not notify
    pub async fn recalculate_optimal_start_hour(&self) -> Result<u8> {
        let backend = self.backend()?;
        let _guard = self.write_lock.lock().await;
        Ok(recompute(backend).await?.optimal_start_hour)
    }

    /// Register a zero-argument callback run after every committed mutation
    pub fn add_change_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.bus.add_listener(listener)
    }

    /// Stream yielding once after every committed mutation
    pub fn changes(&self) -> impl Stream<Item = ()> + Send + 'static {
        self.bus.changes()
    }

    /// Runs after the write has committed, so listeners are notified even
    /// when the recompute fails. A failed recompute leaves no cached value
    /// behind; the next read computes it from the committed sessions.
    async fn after_mutation(&self, backend: &Backend) -> Result<()> {
        let result = recompute(backend).await.map(|_| ());
        if let Err(e) = &result {
            tracing::warn!("Failed to recalculate optimal start hour: {}", e);
            if let Err(e) = backend.clear_metadata().await {
                tracing::error!("Failed to invalidate timeline metadata: {}", e);
            }
        }
        self.bus.notify();
        result
    }
}

async fn recompute(backend: &Backend) -> Result<TimelineMetadata> {
    let sessions = backend.all().await?;
    let metadata = TimelineMetadata {
        last_calculated: chrono::Local::now().naive_local(),
        optimal_start_hour: calculate_optimal_start_hour(&sessions),
    };
    backend.write_metadata(metadata).await?;
    tracing::debug!(
        sessions = sessions.len(),
        hour = metadata.optimal_start_hour,
        "Recalculated optimal start hour"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests;
