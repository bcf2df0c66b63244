//! Demo sessions for trying the timeline without tracked history

use crate::session::{AchievementEntry, Session};
use crate::timeline::week_start;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Friend account used by the demo data
pub const DEMO_FRIEND_ID: &str = "38297301";

// (day offset from Monday, start h:m, end day offset, end h:m, app id, friend?, achievements)
type DemoRow = (i64, (u32, u32), i64, (u32, u32), &'static str, bool, &'static [&'static str]);

const DEMO_ROWS: &[DemoRow] = &[
    (0, (22, 30), 1, (2, 15), "1091500", false, &["NIGHT_CITY_DREAMER", "STREET_CRED"]),
    (2, (14, 0), 2, (17, 45), "1245620", false, &["MARGIT"]),
    (3, (20, 0), 3, (23, 30), "730", false, &[]),
    (4, (16, 0), 4, (20, 45), "1086940", false, &["MIND_FLAYER", "PARTY_TIME", "CRITICAL_HIT"]),
    (5, (15, 0), 5, (17, 30), "252950", false, &["AERIAL_EXPERT"]),
    (5, (11, 0), 5, (12, 30), "252950", false, &[]),
    (4, (22, 15), 5, (2, 42), "105600", false, &[]),
    (5, (22, 15), 6, (1, 42), "105600", true, &[]),
    (6, (14, 5), 6, (18, 47), "730", true, &[]),
    (7, (15, 0), 7, (17, 30), "252950", false, &[]),
];

/// Demo sessions placed in the week containing `today`.
///
/// Includes friend sessions, sessions crossing midnight and one session in
/// the following week.
pub fn demo_sessions(today: NaiveDate) -> Vec<Session> {
    let monday = week_start(today);

    DEMO_ROWS
        .iter()
        .enumerate()
        .filter_map(|(row, &(start_day, (sh, sm), end_day, (eh, em), app_id, is_friend, achievements))| {
            let start = at(monday, start_day, sh, sm)?;
            let end = at(monday, end_day, eh, em)?;

            let mut session = Session::new(app_id, start, end);
            if is_friend {
                session = session.with_account(DEMO_FRIEND_ID);
            }

            let step = (end - start) / (achievements.len() as i32 + 1);
            session.achievement_entries = achievements
                .iter()
                .zip(1..)
                .map(|(achievement_id, n)| AchievementEntry {
                    id: format!("demo-{}-{}", row, n),
                    time: start + step * n,
                    achievement_id: achievement_id.to_string(),
                })
                .collect();

            Some(session)
        })
        .collect()
}

fn at(monday: NaiveDate, day: i64, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some((monday + Duration::days(day)).and_time(time))
}
