//! Deadline arithmetic — pure functions of stored timestamps.
//!
//! Kept apart from the one-second rendering tick so it can be tested
//! without timers.

use chrono::{DateTime, Duration, Utc};

/// Whole seconds left until `ends_at`, rounded up. Zero or negative once due.
pub fn remaining_seconds(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (ends_at - now).num_milliseconds();
    if millis <= 0 {
        millis.div_euclid(1000)
    } else {
        (millis + 999) / 1000
    }
}

/// `true` once `deadline` has been reached.
pub fn has_elapsed(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= deadline
}

/// `true` when enough time has passed since the last check.
pub fn check_gap_elapsed(
    last_check_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_gap: Duration,
) -> bool {
    match last_check_at {
        Some(last) => now - last >= min_gap,
        None => true,
    }
}

/// `M:SS` rendering of a countdown.
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
