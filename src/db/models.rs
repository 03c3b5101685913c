//! Database model types.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a time unit string is not one of `seconds`, `minutes`, `hours`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid time_units '{0}', expected one of seconds, minutes, hours")]
pub struct UnknownTimeUnit(pub String);

/// Multiplier applied to a reservation frequency or snooze duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
        }
    }

    /// Number of seconds in one unit.
    pub fn seconds(&self) -> i64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3600,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seconds" => Ok(TimeUnit::Seconds),
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            other => Err(UnknownTimeUnit(other.to_string())),
        }
    }
}

impl ToSql for TimeUnit {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TimeUnit {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// An SLA contract for one (app, component) pair.
///
/// A `frequency` of zero marks a pair that checked in without ever being
/// reserved; such a pair has no SLA and never fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: i64,
    pub app: String,
    pub component: String,
    pub owner: String,
    pub notify: String,
    pub alert_message: Option<String>,
    pub frequency: u32,
    pub time_units: TimeUnit,
    pub last_checkin_timestamp: i64,
    pub num_checkins: i64,
}

impl Reservation {
    /// Longest permitted gap between checkins, in seconds.
    pub fn allowed_gap_secs(&self) -> i64 {
        i64::from(self.frequency) * self.time_units.seconds()
    }
}

/// Validated contract fields for creating or updating a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub app: String,
    pub component: String,
    pub owner: String,
    pub notify: String,
    pub alert_message: Option<String>,
    pub frequency: u32,
    pub time_units: TimeUnit,
}

/// A temporary suppression of SLA failures for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snooze {
    pub app: String,
    pub component: String,
    pub duration: u32,
    pub time_units: TimeUnit,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl Snooze {
    pub fn new(app: &str, component: &str, duration: u32, time_units: TimeUnit, issued_at: i64) -> Self {
        Self {
            app: app.to_string(),
            component: component.to_string(),
            duration,
            time_units,
            issued_at,
            expires_at: issued_at + i64::from(duration) * time_units.seconds(),
        }
    }

    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// A peer in the monitor cluster.
///
/// `is_coordinator` is never stored; it is filled in by polling the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: i64,
    pub ip_address: String,
    pub node_id: i64,
    pub is_coordinator: bool,
}

/// Alert count for one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadGuest {
    pub app: String,
    pub component: String,
    pub num_fails: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_parse() {
        assert_eq!("seconds".parse::<TimeUnit>().unwrap(), TimeUnit::Seconds);
        assert_eq!("minutes".parse::<TimeUnit>().unwrap(), TimeUnit::Minutes);
        assert_eq!("hours".parse::<TimeUnit>().unwrap(), TimeUnit::Hours);
        assert!("days".parse::<TimeUnit>().is_err());
        assert!("Minutes".parse::<TimeUnit>().is_err());
        assert!("".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_snooze_expiry() {
        let snooze = Snooze::new("svc", "db", 2, TimeUnit::Hours, 1_000);
        assert_eq!(snooze.expires_at, 1_000 + 7_200);
        assert!(snooze.is_active(8_199));
        assert!(!snooze.is_active(8_200));
    }
}
