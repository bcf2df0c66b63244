//! Timekeeper - local playtime session store with timeline statistics
//!
//! This crate provides:
//! - A durable session store (SQLite or in-memory) with range queries
//! - The optimal timeline start hour, kept in step with every mutation
//! - Change notification for views that re-query after each write
//! - A session tracker turning running-app snapshots into sessions
//!
//! # Usage
//!
//! ```ignore
//! use timekeeper::{Config, Core};
//!
//! let core = Core::new(Config::load_or_default(Config::default_path()));
//! core.initialize().await?;
//! let hour = core.store().get_optimal_start_hour().await?;
//! ```

pub mod config;
pub mod db;
pub mod demo;
pub mod error;
pub mod notify;
pub mod optimal_hour;
pub mod session;
pub mod store;
pub mod timeline;
pub mod tracker;

// Re-export main types for convenience
pub use config::Config;
pub use error::{CoreError, Result};
pub use session::{AchievementEntry, MarkerEntry, Session, TimelineMetadata};
pub use store::{SessionStore, StoreLocation};

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracker::{ActivitySource, SessionTracker};

/// Owns the configuration and the single store shared by every consumer
pub struct Core {
    /// Configuration
    pub config: Config,

    store: Arc<SessionStore>,
}

impl Core {
    /// Create a Core whose store is not yet initialized
    pub fn new(config: Config) -> Self {
        let store = Arc::new(SessionStore::from_config(&config));
        Core { config, store }
    }

    /// Open storage, migrate and seed (idempotent)
    pub async fn initialize(&self) -> Result<()> {
        self.store.initialize().await
    }

    /// Shared store handle
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start polling `source` in the background until `shutdown` resolves
    pub fn spawn_tracker<S, F>(&self, source: S, shutdown: F) -> JoinHandle<()>
    where
        S: ActivitySource + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let tracker = SessionTracker::new(Arc::clone(&self.store), self.config.tracker.min_session());
        tokio::spawn(tracker.run(source, self.config.tracker.poll_interval(), shutdown))
    }
}
