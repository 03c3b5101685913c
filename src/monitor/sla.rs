//! SLA evaluation for a single reservation.

use chrono::{DateTime, Duration, Utc};

use super::relative_time::{elapsed, relative_phrase};
use crate::db::{Reservation, Snooze};

/// Outcome of evaluating a reservation at an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub failing: bool,
    /// Time since the last checkin, clamped at zero.
    pub elapsed: Duration,
    pub elapsed_phrase: String,
}

/// Decide whether `reservation` is failing its SLA at `now`.
///
/// An active snooze for the pair suppresses failure regardless of elapsed
/// time. A reservation with `frequency == 0` has no SLA and never fails.
/// A checkin timestamp in the future counts as "just now".
pub fn evaluate(reservation: &Reservation, active_snooze: Option<&Snooze>, now: DateTime<Utc>) -> Evaluation {
    let last_checkin = DateTime::from_timestamp(reservation.last_checkin_timestamp, 0).unwrap_or_default();
    let elapsed = elapsed(last_checkin, now).max(Duration::zero());

    let snoozed = active_snooze.is_some_and(|s| {
        s.app == reservation.app && s.component == reservation.component && s.is_active(now.timestamp())
    });

    let failing = !snoozed && reservation.frequency > 0 && elapsed.num_seconds() > reservation.allowed_gap_secs();

    Evaluation {
        failing,
        elapsed,
        elapsed_phrase: relative_phrase(elapsed, "ago"),
    }
}
