//! Week timeline helpers
//!
//! The store answers containment queries only. Views that must show sessions
//! crossing a day or week boundary query a padded range and narrow it here
//! with the overlap predicate.

use crate::error::Result;
use crate::session::Session;
use crate::store::SessionStore;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Selection id standing for the local user in friend filters
pub const CURRENT_USER_ID: &str = "me";

/// Monday of the week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// 00:00:00.000 of `date`
pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// 23:59:59.999 of `date`
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    start_of_day(date) + Duration::days(1) - Duration::milliseconds(1)
}

/// Whether the session is visible anywhere in `[start, end]`
pub fn overlaps(session: &Session, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    let (s, e) = (session.start_time, session.end_time);
    (start <= s && s <= end) || (start <= e && e <= end) || (s < start && e > end)
}

/// Sessions visible on `day`, including those continuing from or into neighbours
pub fn sessions_for_day(sessions: &[Session], day: NaiveDate) -> Vec<&Session> {
    let (start, end) = (start_of_day(day), end_of_day(day));
    sessions.iter().filter(|s| overlaps(s, start, end)).collect()
}

/// Whether the session ends on a later calendar day than it starts
pub fn spans_midnight(session: &Session) -> bool {
    session.end_time.date() > session.start_time.date()
}

/// Whole minutes played
pub fn duration_minutes(session: &Session) -> i64 {
    session.duration().num_minutes()
}

/// `"3h 45m"`
pub fn format_duration(minutes: i64) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// `"12 AM"`, `"1 PM"`, ...
pub fn format_hour_label(hour: u8) -> String {
    match hour {
        0 => "12 AM".to_string(),
        1..=11 => format!("{} AM", hour),
        12 => "12 PM".to_string(),
        _ => format!("{} PM", hour - 12),
    }
}

/// Position of `hour` on a timeline that begins at `start_hour`
pub fn normalize_hour(hour: u8, start_hour: u8) -> u8 {
    ((u16::from(hour) + 24 - u16::from(start_hour) % 24) % 24) as u8
}

/// Friend filter: the local user matches [`CURRENT_USER_ID`], friends match their id
pub fn is_selected(session: &Session, selected: &[String]) -> bool {
    let key = session.account_id.as_deref().unwrap_or(CURRENT_USER_ID);
    selected.iter().any(|id| id == key)
}

/// Sessions and timeline anchor for one Monday-to-Sunday week
#[derive(Debug, Clone)]
pub struct WeekView {
    pub week_start: NaiveDate,
    /// Week sessions passing the friend filter
    pub sessions: Vec<Session>,
    /// Every session visible in the week, unfiltered
    pub all_week_sessions: Vec<Session>,
    pub timeline_start_hour: u8,
}

impl WeekView {
    /// Load the week containing `date` for the selected accounts
    pub async fn load(store: &SessionStore, date: NaiveDate, selected: &[String]) -> Result<Self> {
        let monday = week_start(date);
        let sunday = monday + Duration::days(6);

        // One day of padding catches sessions crossing the week boundary
        let padded = store
            .get_sessions_by_date_range(
                start_of_day(monday - Duration::days(1)),
                end_of_day(sunday + Duration::days(1)),
            )
            .await?;
        let timeline_start_hour = store.get_optimal_start_hour().await?;

        let (start, end) = (start_of_day(monday), end_of_day(sunday));
        let all_week_sessions: Vec<Session> = padded
            .into_iter()
            .filter(|s| overlaps(s, start, end))
            .collect();
        let sessions = all_week_sessions
            .iter()
            .filter(|s| is_selected(s, selected))
            .cloned()
            .collect();

        Ok(WeekView {
            week_start: monday,
            sessions,
            all_week_sessions,
            timeline_start_hour,
        })
    }

    /// Monday through Sunday
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..7).map(move |offset| self.week_start + Duration::days(offset))
    }

    /// Filtered sessions visible on `day`
    pub fn sessions_on(&self, day: NaiveDate) -> Vec<&Session> {
        sessions_for_day(&self.sessions, day)
    }

    pub fn total_minutes(&self) -> i64 {
        self.sessions.iter().map(duration_minutes).sum()
    }

    pub fn total_achievements(&self) -> usize {
        self.sessions.iter().map(|s| s.achievement_entries.len()).sum()
    }
}
