//! Session tracker
//!
//! Turns periodic snapshots of running applications into session lifecycle
//! transitions against the store:
//! - launch: start an in-memory session, nothing is written yet
//! - heartbeat: extend `end_time`; once the session is at least the minimum
//!   duration it is inserted, later heartbeats update it in place
//! - quit: final `end_time`; a session that never reached the minimum
//!   duration is dropped without ever being persisted
//!
//! Host integration (which applications are running, what friends are
//! playing) is provided through [`ActivitySource`].

use crate::error::Result;
use crate::session::Session;
use crate::store::SessionStore;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// What a friend is currently playing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendActivity {
    pub account_id: String,
    /// `None` when the friend is not in a game
    pub app_id: Option<String>,
}

/// Point-in-time view of running applications
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Applications the local user is running
    pub running_apps: Vec<String>,
    pub friends: Vec<FriendActivity>,
}

/// Host integration polled by [`SessionTracker::run`]
pub trait ActivitySource: Send {
    fn snapshot(&mut self) -> Result<ActivitySnapshot>;
}

/// Counters for one tick, mostly useful for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub launched: usize,
    /// Sessions inserted into the store this tick
    pub committed: usize,
    pub finished: usize,
    /// Sessions that ended below the minimum duration
    pub dropped: usize,
    pub failed: usize,
}

/// Session lifecycle state machine for the local user and friends
pub struct SessionTracker {
    store: Arc<SessionStore>,
    min_session: chrono::Duration,
    /// Running local sessions by app id
    local: HashMap<String, Session>,
    /// Running friend sessions by account id
    friends: HashMap<String, Session>,
    /// Finished sessions whose final write failed, retried next tick
    unflushed: Vec<Session>,
}

impl SessionTracker {
    pub fn new(store: Arc<SessionStore>, min_session: chrono::Duration) -> Self {
        SessionTracker {
            store,
            min_session,
            local: HashMap::new(),
            friends: HashMap::new(),
            unflushed: Vec::new(),
        }
    }

    /// App ids of running local sessions
    pub fn running_apps(&self) -> impl Iterator<Item = &str> {
        self.local.keys().map(String::as_str)
    }

    /// Currently tracked session of a friend
    pub fn friend_session(&self, account_id: &str) -> Option<&Session> {
        self.friends.get(account_id)
    }

    /// Apply one snapshot taken at `now`
    pub async fn tick(&mut self, snapshot: &ActivitySnapshot, now: NaiveDateTime) -> TickSummary {
        let mut summary = TickSummary::default();

        // Retried records keep the end time they were closed with
        for session in std::mem::take(&mut self.unflushed) {
            self.finish(session, &mut summary).await;
        }

        // Local user
        let running: HashSet<&str> = snapshot.running_apps.iter().map(String::as_str).collect();
        let quit: Vec<String> = self
            .local
            .keys()
            .filter(|app| !running.contains(app.as_str()))
            .cloned()
            .collect();
        for app_id in quit {
            if let Some(session) = self.local.remove(&app_id) {
                tracing::debug!(app_id = %app_id, "App quit");
                self.finish(close(session, now), &mut summary).await;
            }
        }
        for app_id in &snapshot.running_apps {
            let mut session = match self.local.remove(app_id) {
                Some(session) => session,
                None => {
                    tracing::debug!(app_id = %app_id, "App launched");
                    summary.launched += 1;
                    Session::new(app_id.clone(), now, now)
                }
            };
            self.advance(&mut session, now, &mut summary).await;
            self.local.insert(app_id.clone(), session);
        }

        // Friends; one missing from the snapshot is treated as offline
        let seen: HashSet<&str> = snapshot
            .friends
            .iter()
            .map(|f| f.account_id.as_str())
            .collect();
        let gone: Vec<String> = self
            .friends
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        for account_id in gone {
            if let Some(session) = self.friends.remove(&account_id) {
                self.finish(close(session, now), &mut summary).await;
            }
        }
        for friend in &snapshot.friends {
            let current = self.friends.remove(&friend.account_id);
            let playing = friend.app_id.as_deref().filter(|app| !app.is_empty() && *app != "0");

            let mut session = match (current, playing) {
                (Some(current), Some(app)) if current.app_id == app => current,
                (current, Some(app)) => {
                    if let Some(previous) = current {
                        self.finish(close(previous, now), &mut summary).await;
                    }
                    tracing::debug!(account_id = %friend.account_id, app_id = app, "Friend launched app");
                    summary.launched += 1;
                    Session::new(app, now, now).with_account(friend.account_id.clone())
                }
                (Some(previous), None) => {
                    self.finish(close(previous, now), &mut summary).await;
                    continue;
                }
                (None, None) => continue,
            };
            self.advance(&mut session, now, &mut summary).await;
            self.friends.insert(friend.account_id.clone(), session);
        }

        summary
    }

    /// Finalize every running session, e.g. on shutdown
    pub async fn finish_all(&mut self, now: NaiveDateTime) -> TickSummary {
        let mut summary = TickSummary::default();
        let sessions: Vec<Session> = self
            .local
            .drain()
            .chain(self.friends.drain())
            .map(|(_, s)| close(s, now))
            .chain(std::mem::take(&mut self.unflushed))
            .collect();
        for session in sessions {
            self.finish(session, &mut summary).await;
        }
        summary
    }

    /// Poll `source` every `interval` until `shutdown` resolves
    pub async fn run<S, F>(mut self, mut source: S, interval: Duration, shutdown: F)
    where
        S: ActivitySource,
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = interval.as_secs_f64(), "Session tracker started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let snapshot = match source.snapshot() {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            tracing::warn!("Failed to read running apps: {}", e);
                            continue;
                        }
                    };
                    let summary = self.tick(&snapshot, now()).await;
                    if summary != TickSummary::default() {
                        tracing::debug!(?summary, "Tracker tick");
                    }
                }
            }
        }

        let summary = self.finish_all(now()).await;
        tracing::info!(finished = summary.finished, dropped = summary.dropped, "Session tracker stopped");
    }

    /// Heartbeat: extend and write through once the session is long enough
    async fn advance(&self, session: &mut Session, now: NaiveDateTime, summary: &mut TickSummary) {
        extend(session, now);
        if let Err(e) = self.write(session, summary).await {
            tracing::error!(app_id = %session.app_id, "Failed to record session: {}", e);
            summary.failed += 1;
        }
    }

    /// Persist a closed session; its end time is not touched again
    async fn finish(&mut self, mut session: Session, summary: &mut TickSummary) {
        match self.write(&mut session, summary).await {
            Ok(()) if session.id.is_some() => summary.finished += 1,
            Ok(()) => {
                tracing::debug!(app_id = %session.app_id, "Dropped session below minimum duration");
                summary.dropped += 1;
            }
            Err(e) => {
                tracing::error!(app_id = %session.app_id, "Failed to finalize session: {}", e);
                summary.failed += 1;
                self.unflushed.push(session);
            }
        }
    }

    async fn write(&self, session: &mut Session, summary: &mut TickSummary) -> Result<()> {
        if session.id.is_some() {
            self.store.update_session(session.clone()).await
        } else if session.duration() >= self.min_session {
            let id = self.store.add_session(session.clone()).await?;
            session.id = Some(id);
            summary.committed += 1;
            Ok(())
        } else {
            Ok(())
        }
    }
}

/// Move `end_time` forward to `now`; it never moves backwards
fn extend(session: &mut Session, now: NaiveDateTime) {
    if now > session.end_time {
        session.end_time = now;
    }
}

/// Final end time at quit
fn close(mut session: Session, now: NaiveDateTime) -> Session {
    extend(&mut session, now);
    session
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
