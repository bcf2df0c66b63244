//! Optimal timeline start hour
//!
//! Builds a 24-bucket activity histogram from session history and anchors the
//! timeline a few hours after the quietest hour, so the usual sleep period
//! renders in the middle of the day row instead of splitting sessions.

use crate::session::Session;
use chrono::Timelike;

/// Hours added to the quietest hour to get the timeline anchor
pub const QUIET_OFFSET_HOURS: usize = 3;

const HOURS_PER_DAY: usize = 24;
const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Count, per clock hour, how many sessions touched that hour.
///
/// A session "spans midnight" when its end hour is before its start hour, or
/// the hours are equal and it has positive length. Spanning sessions count
/// `start..=23` and `0..=end`. Other sessions count `ceil(duration in hours)`
/// buckets from the start hour without wrapping past 23.
pub fn hour_histogram(sessions: &[Session]) -> [u32; HOURS_PER_DAY] {
    let mut histogram = [0u32; HOURS_PER_DAY];

    for session in sessions {
        let start_hour = session.start_time.hour() as usize;
        let end_hour = session.end_time.hour() as usize;
        let elapsed_ms = (session.end_time - session.start_time).num_milliseconds();

        let spans_midnight = end_hour < start_hour || (end_hour == start_hour && elapsed_ms > 0);

        if spans_midnight {
            for bucket in histogram.iter_mut().skip(start_hour) {
                *bucket += 1;
            }
            for bucket in histogram.iter_mut().take(end_hour + 1) {
                *bucket += 1;
            }
        } else {
            let session_hours = if elapsed_ms > 0 {
                ((elapsed_ms + MILLIS_PER_HOUR - 1) / MILLIS_PER_HOUR) as usize
            } else {
                0
            };
            // Deliberately no wraparound: hours past 23 are dropped.
            for hour in start_hour..(start_hour + session_hours).min(HOURS_PER_DAY) {
                histogram[hour % HOURS_PER_DAY] += 1;
            }
        }
    }

    histogram
}

/// Compute the hour the 24-hour timeline should start at.
///
/// Returns 0 for an empty history. Otherwise the lowest-index hour with the
/// minimum activity count, shifted by [`QUIET_OFFSET_HOURS`].
pub fn calculate_optimal_start_hour(sessions: &[Session]) -> u8 {
    if sessions.is_empty() {
        return 0;
    }

    let histogram = hour_histogram(sessions);

    let mut quietest_hour = 0;
    let mut min_activity = u32::MAX;
    for (hour, &count) in histogram.iter().enumerate() {
        if count < min_activity {
            min_activity = count;
            quietest_hour = hour;
        }
    }

    ((quietest_hour + QUIET_OFFSET_HOURS) % HOURS_PER_DAY) as u8
}
