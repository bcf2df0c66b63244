//! Session data model
//!
//! A session is one interval of activity for one application by one account.
//! `account_id == None` marks the local user; any other value is a tracked friend.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Key of the singleton timeline metadata record
pub const TIMELINE_METADATA_KEY: &str = "timeline";

/// Achievement unlocked during a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementEntry {
    pub id: String,
    pub time: NaiveDateTime,
    pub achievement_id: String,
}

/// Timestamped annotation attached to a session (recording marker, note, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerEntry {
    pub id: String,
    pub time: NaiveDateTime,
    pub marker_id: String,
}

/// One tracked interval of application activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Assigned by the store on first insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Application identifier, shared by many sessions
    pub app_id: String,

    /// Friend account id, `None` for the local user
    #[serde(default)]
    pub account_id: Option<String>,

    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,

    #[serde(default)]
    pub achievement_entries: Vec<AchievementEntry>,

    #[serde(default)]
    pub marker_entries: Vec<MarkerEntry>,
}

impl Session {
    /// Create an unsaved local-user session
    pub fn new(app_id: impl Into<String>, start_time: NaiveDateTime, end_time: NaiveDateTime) -> Self {
        Session {
            id: None,
            app_id: app_id.into(),
            account_id: None,
            start_time,
            end_time,
            achievement_entries: Vec::new(),
            marker_entries: Vec::new(),
        }
    }

    /// Attribute the session to a friend account
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Whether the session belongs to the local user
    pub fn is_local(&self) -> bool {
        self.account_id.is_none()
    }

    /// Elapsed time between start and end
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

/// Cached result of the optimal start hour computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineMetadata {
    pub last_calculated: NaiveDateTime,
    /// Always in `0..24`
    pub optimal_start_hour: u8,
}

/// Encode a wall-clock timestamp as milliseconds for storage and ordering
pub fn to_millis(time: NaiveDateTime) -> i64 {
    time.and_utc().timestamp_millis()
}

/// Decode a stored millisecond timestamp
pub fn from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}
