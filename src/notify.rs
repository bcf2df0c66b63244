//! Change notification bus
//!
//! In-process publish/subscribe scoped to one session store. Notifications
//! carry no payload: listeners re-query the store for whatever they display.
//! Two flavors are offered over the same `notify()`:
//! - zero-argument callbacks registered with [`ChangeBus::add_listener`]
//! - an async stream from [`ChangeBus::changes`] for long-running consumers

use futures::Stream;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Callback invoked after every committed mutation
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

type Registry = Mutex<BTreeMap<u64, ChangeListener>>;

/// Observer registry owned by a session store
pub struct ChangeBus {
    listeners: Arc<Registry>,
    next_id: AtomicU64,
    tx: broadcast::Sender<()>,
}

/// Disposer returned by [`ChangeBus::add_listener`].
///
/// Dropping it keeps the registration alive; call [`Subscription::unsubscribe`]
/// to remove it. Unsubscribing more than once is a no-op.
pub struct Subscription {
    registry: Weak<Registry>,
    id: u64,
}

impl Subscription {
    /// Remove exactly the registration this handle was returned for
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        ChangeBus {
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
            tx,
        }
    }

    /// Register a zero-argument callback
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.listeners.lock() {
            Ok(mut listeners) => {
                listeners.insert(id, Arc::new(listener));
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, Arc::new(listener));
            }
        }
        Subscription {
            registry: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Stream that yields once per notification.
    ///
    /// A slow consumer that lags behind still receives an item, so it always
    /// re-queries after a burst of changes.
    pub fn changes(&self) -> impl Stream<Item = ()> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).map(|_| ())
    }

    /// Invoke every listener once.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners
    /// still run.
    pub fn notify(&self) {
        // Snapshot so listeners may (un)subscribe from inside the callback
        let snapshot: Vec<(u64, ChangeListener)> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(id, l)| (*id, Arc::clone(l))).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(id, l)| (*id, Arc::clone(l)))
                .collect(),
        };

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::warn!(listener_id = id, "Change listener panicked; continuing");
            }
        }

        // No receivers is fine
        let _ = self.tx.send(());
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
