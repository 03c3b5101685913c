//! Human-readable relative time phrases ("3 minutes ago").

use chrono::{DateTime, Duration, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;
const LONG_TIME: i64 = 37 * YEAR;

/// Time elapsed from `then` until `now`. Negative if `then` is in the future.
pub fn elapsed(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(then)
}

/// Render a duration as a coarse phrase followed by `suffix`.
///
/// Durations under one second (including negative ones) render as "just now".
pub fn relative_phrase(duration: Duration, suffix: &str) -> String {
    let secs = duration.num_seconds();
    if secs < 1 {
        return "just now".to_string();
    }

    let (count, unit) = match secs {
        s if s < MINUTE => (s, "second"),
        s if s < HOUR => (s / MINUTE, "minute"),
        s if s < DAY => (s / HOUR, "hour"),
        s if s < WEEK => (s / DAY, "day"),
        s if s < MONTH => (s / WEEK, "week"),
        s if s < YEAR => (s / MONTH, "month"),
        s if s < LONG_TIME => (s / YEAR, "year"),
        _ => return format!("a long while {suffix}").trim_end().to_string(),
    };

    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural} {suffix}").trim_end().to_string()
}

/// Describe `then` relative to `now`: "5 minutes ago" or "2 hours from now".
pub fn rel_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = elapsed(then, now);
    if delta < Duration::zero() {
        relative_phrase(-delta, "from now")
    } else {
        relative_phrase(delta, "ago")
    }
}
