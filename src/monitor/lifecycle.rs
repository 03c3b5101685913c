//! Validated state transitions for reservations, checkins and snoozes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::sla::evaluate;
use crate::db::{BadGuest, DbError, NewReservation, Reservation, Snooze, Store, TimeUnit, UnknownTimeUnit};

/// Lifecycle error types.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("validation failure: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub notify: String,
    #[serde(default, alias = "alert_msg", alias = "alert_message")]
    pub alert_message: Option<String>,
    #[serde(default)]
    pub frequency: i64,
    #[serde(default, alias = "time_units")]
    pub time_units: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeRequest {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, alias = "time_units")]
    pub time_units: String,
}

/// Body of a checkin or checkout request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairRequest {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub component: String,
}

/// A reservation with its SLA evaluated for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStatus {
    #[serde(flatten)]
    pub reservation: Reservation,
    #[serde(rename = "failingSLA")]
    pub failing_sla: bool,
    pub time_since_last_checkin: String,
    pub last_checkin_str: String,
    pub snoozed_until: Option<i64>,
}

/// Applies reservation, checkin, snooze and checkout requests to the store.
pub struct Lifecycle {
    store: Arc<Store>,
}

impl Lifecycle {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Create a reservation, or replace the contract of an existing one.
    pub fn create_reservation(
        &self,
        req: ReservationRequest,
        now: DateTime<Utc>,
    ) -> Result<NewReservation, LifecycleError> {
        require_pair(&req.app, &req.component)?;
        let time_units = parse_time_units(&req.time_units)?;
        let frequency = positive_u32(req.frequency, "frequency")?;

        let reservation = NewReservation {
            app: req.app,
            component: req.component,
            owner: req.owner,
            notify: req.notify,
            alert_message: req.alert_message.filter(|m| !m.is_empty()),
            frequency,
            time_units,
        };

        self.store.upsert_reservation(&reservation, now.timestamp())?;
        tracing::info!(
            "Reserved app [{}] component [{}] every {} {}",
            reservation.app,
            reservation.component,
            reservation.frequency,
            reservation.time_units
        );

        Ok(reservation)
    }

    /// Record a checkin. Pairs without a reservation are accepted.
    pub fn apply_checkin(&self, req: PairRequest, now: DateTime<Utc>) -> Result<Reservation, LifecycleError> {
        require_pair(&req.app, &req.component)?;

        let reservation = self.store.record_checkin(&req.app, &req.component, now.timestamp())?;
        if reservation.frequency == 0 && reservation.num_checkins == 1 {
            tracing::info!(
                "app [{}] component [{}] checked in without a reservation",
                req.app,
                req.component
            );
        }
        tracing::info!("app [{}] component [{}] checked in at {}", req.app, req.component, now);

        Ok(reservation)
    }

    /// Pause SLA failures for a pair.
    pub fn apply_snooze(&self, req: SnoozeRequest, now: DateTime<Utc>) -> Result<Snooze, LifecycleError> {
        require_pair(&req.app, &req.component)?;
        let time_units = parse_time_units(&req.time_units)?;
        let duration = positive_u32(req.duration, "duration")?;

        let snooze = Snooze::new(&req.app, &req.component, duration, time_units, now.timestamp());
        self.store.insert_snooze(&snooze)?;
        tracing::info!(
            "Snoozed app [{}] component [{}] until {}",
            snooze.app,
            snooze.component,
            snooze.expires_at
        );

        Ok(snooze)
    }

    /// Remove a reservation. Removing an unknown pair is not an error.
    ///
    /// Returns whether a reservation was removed.
    pub fn checkout(&self, req: PairRequest) -> Result<bool, LifecycleError> {
        require_pair(&req.app, &req.component)?;

        let removed = self.store.delete_reservation(&req.app, &req.component)?;
        if removed {
            tracing::info!("Checked out app [{}] component [{}]", req.app, req.component);
        } else {
            tracing::debug!("Checkout for unknown app [{}] component [{}]", req.app, req.component);
        }

        Ok(removed)
    }

    /// The evaluated reservation for one pair.
    pub fn reservation_status(
        &self,
        app: &str,
        component: &str,
        now: DateTime<Utc>,
    ) -> Result<ReservationStatus, LifecycleError> {
        let reservation = self
            .store
            .get_reservation(app, component)?
            .ok_or_else(|| LifecycleError::NotFound(format!("{app}/{component}")))?;
        let snooze = self.store.active_snooze(app, component, now.timestamp())?;

        Ok(status_of(reservation, snooze.as_ref(), now))
    }

    /// All reservations, most recent checkin first, evaluated at `now`.
    pub fn list_reservations(&self, now: DateTime<Utc>) -> Result<Vec<ReservationStatus>, LifecycleError> {
        let reservations = self.store.list_reservations()?;

        // Snoozes come back latest expiry first, so the first per pair wins.
        let mut snoozes: HashMap<(String, String), Snooze> = HashMap::new();
        for snooze in self.store.active_snoozes(now.timestamp())? {
            snoozes
                .entry((snooze.app.clone(), snooze.component.clone()))
                .or_insert(snooze);
        }

        let statuses = reservations
            .into_iter()
            .map(|reservation| {
                let snooze = snoozes.get(&(reservation.app.clone(), reservation.component.clone()));
                status_of(reservation, snooze, now)
            })
            .collect();

        Ok(statuses)
    }

    /// Alert counts per pair.
    pub fn bad_guests(&self) -> Result<Vec<BadGuest>, LifecycleError> {
        Ok(self.store.bad_guests()?)
    }
}

fn status_of(reservation: Reservation, snooze: Option<&Snooze>, now: DateTime<Utc>) -> ReservationStatus {
    let eval = evaluate(&reservation, snooze, now);
    let last_checkin = DateTime::from_timestamp(reservation.last_checkin_timestamp, 0).unwrap_or_default();

    ReservationStatus {
        failing_sla: eval.failing,
        time_since_last_checkin: eval.elapsed_phrase,
        last_checkin_str: last_checkin.format("%a, %d %b %Y %H:%M:%S UTC").to_string(),
        snoozed_until: snooze.map(|s| s.expires_at),
        reservation,
    }
}

fn require_pair(app: &str, component: &str) -> Result<(), LifecycleError> {
    if app.trim().is_empty() {
        return Err(LifecycleError::Validation("app is required".to_string()));
    }
    if component.trim().is_empty() {
        return Err(LifecycleError::Validation("component is required".to_string()));
    }
    Ok(())
}

fn parse_time_units(raw: &str) -> Result<TimeUnit, LifecycleError> {
    raw.parse()
        .map_err(|e: UnknownTimeUnit| LifecycleError::Validation(e.to_string()))
}

fn positive_u32(value: i64, field: &str) -> Result<u32, LifecycleError> {
    if value <= 0 {
        return Err(LifecycleError::Validation(format!("{field} must be greater than zero")));
    }
    u32::try_from(value).map_err(|_| LifecycleError::Validation(format!("{field} is too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn pair(app: &str, component: &str) -> PairRequest {
        PairRequest {
            app: app.to_string(),
            component: component.to_string(),
        }
    }

    fn reservation_request(frequency: i64, time_units: &str) -> ReservationRequest {
        ReservationRequest {
            app: "svc".to_string(),
            component: "db".to_string(),
            owner: "ops".to_string(),
            notify: "ops@example.com".to_string(),
            alert_message: None,
            frequency,
            time_units: time_units.to_string(),
        }
    }

    fn snooze_request(duration: i64, time_units: &str) -> SnoozeRequest {
        SnoozeRequest {
            app: "svc".to_string(),
            component: "db".to_string(),
            duration,
            time_units: time_units.to_string(),
        }
    }

    #[test]
    fn test_create_reservation_starts_empty() {
        let lc = lifecycle();
        lc.create_reservation(reservation_request(5, "minutes"), base()).unwrap();

        let res = lc.reservation_status("svc", "db", base()).unwrap().reservation;
        assert_eq!(res.num_checkins, 0);
        assert_eq!(res.last_checkin_timestamp, 0);
        assert_eq!(res.frequency, 5);
        assert_eq!(lc.store().housekeeping_count("svc", "db", "reserve"), 1);
    }

    #[test]
    fn test_create_reservation_validation() {
        let lc = lifecycle();
        for (frequency, units) in [(5, "days"), (5, ""), (0, "minutes"), (-3, "seconds"), (i64::MAX, "hours")] {
            let err = lc.create_reservation(reservation_request(frequency, units), base());
            assert!(
                matches!(err, Err(LifecycleError::Validation(_))),
                "frequency={frequency} units={units}"
            );
        }

        let mut missing_app = reservation_request(5, "minutes");
        missing_app.app = "  ".to_string();
        assert!(matches!(
            lc.create_reservation(missing_app, base()),
            Err(LifecycleError::Validation(_))
        ));

        // Nothing was persisted by the rejected requests
        assert!(lc.list_reservations(base()).unwrap().is_empty());
    }

    #[test]
    fn test_checkin_increments_exactly_once() {
        let lc = lifecycle();
        lc.create_reservation(reservation_request(5, "minutes"), base()).unwrap();

        let now = base() + Duration::seconds(42);
        let res = lc.apply_checkin(pair("svc", "db"), now).unwrap();
        assert_eq!(res.num_checkins, 1);
        assert_eq!(res.last_checkin_timestamp, now.timestamp());

        let later = now + Duration::minutes(1);
        let res = lc.apply_checkin(pair("svc", "db"), later).unwrap();
        assert_eq!(res.num_checkins, 2);
        assert_eq!(res.last_checkin_timestamp, later.timestamp());
        assert_eq!(lc.store().housekeeping_count("svc", "db", "checkin"), 2);
    }

    #[test]
    fn test_checkin_for_unknown_pair_is_accepted() {
        let lc = lifecycle();
        let now = base();
        let res = lc.apply_checkin(pair("new", "x"), now).unwrap();

        assert_eq!(res.num_checkins, 1);
        assert_eq!(res.last_checkin_timestamp, now.timestamp());
        assert_eq!(res.frequency, 0);

        // Without a declared SLA the pair never fails
        let statuses = lc.list_reservations(now + Duration::days(30)).unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].failing_sla);
    }

    #[test]
    fn test_reservation_upgrades_implicit_record() {
        let lc = lifecycle();
        lc.apply_checkin(pair("svc", "db"), base()).unwrap();
        lc.create_reservation(reservation_request(1, "minutes"), base()).unwrap();

        let res = lc.reservation_status("svc", "db", base()).unwrap().reservation;
        assert_eq!(res.num_checkins, 1);
        assert_eq!(res.frequency, 1);

        let statuses = lc.list_reservations(base() + Duration::minutes(2)).unwrap();
        assert!(statuses[0].failing_sla);
    }

    #[test]
    fn test_checkin_requires_identity() {
        let lc = lifecycle();
        assert!(matches!(
            lc.apply_checkin(pair("", "x"), base()),
            Err(LifecycleError::Validation(_))
        ));
        assert!(matches!(
            lc.apply_checkin(pair("svc", ""), base()),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn test_snooze_validation() {
        let lc = lifecycle();
        for (duration, units) in [(0, "hours"), (-1, "hours"), (1, "weeks"), (1, "HOURS")] {
            let err = lc.apply_snooze(snooze_request(duration, units), base());
            assert!(
                matches!(err, Err(LifecycleError::Validation(_))),
                "duration={duration} units={units}"
            );
        }
        assert!(lc.store().active_snoozes(0).unwrap().is_empty());
    }

    #[test]
    fn test_snooze_scenario() {
        let lc = lifecycle();
        let t = base();
        lc.create_reservation(reservation_request(5, "minutes"), t).unwrap();
        lc.apply_checkin(pair("svc", "db"), t).unwrap();

        assert!(!lc.list_reservations(t + Duration::minutes(4)).unwrap()[0].failing_sla);
        assert!(lc.list_reservations(t + Duration::minutes(6)).unwrap()[0].failing_sla);

        let snooze = lc
            .apply_snooze(snooze_request(1, "hours"), t + Duration::minutes(6))
            .unwrap();
        let status = &lc.list_reservations(t + Duration::minutes(6) + Duration::seconds(30)).unwrap()[0];
        assert!(!status.failing_sla);
        assert_eq!(status.snoozed_until, Some(snooze.expires_at));

        // Failing again once the snooze runs out
        let after = t + Duration::minutes(6) + Duration::hours(1);
        assert!(lc.list_reservations(after).unwrap()[0].failing_sla);
    }

    #[test]
    fn test_longest_lived_snooze_wins() {
        let lc = lifecycle();
        let t = base();
        lc.create_reservation(reservation_request(1, "seconds"), t).unwrap();

        lc.apply_snooze(snooze_request(2, "hours"), t).unwrap();
        lc.apply_snooze(snooze_request(10, "minutes"), t + Duration::minutes(1)).unwrap();

        let status = &lc.list_reservations(t + Duration::minutes(5)).unwrap()[0];
        assert!(!status.failing_sla);
        assert_eq!(status.snoozed_until, Some((t + Duration::hours(2)).timestamp()));

        let status = &lc.list_reservations(t + Duration::minutes(30)).unwrap()[0];
        assert!(!status.failing_sla);
    }

    #[test]
    fn test_checkout_is_idempotent() {
        let lc = lifecycle();
        lc.create_reservation(reservation_request(5, "minutes"), base()).unwrap();

        assert!(lc.checkout(pair("svc", "db")).unwrap());
        assert!(!lc.checkout(pair("svc", "db")).unwrap());
        assert!(!lc.checkout(pair("ghost", "x")).unwrap());
        assert!(lc.list_reservations(base()).unwrap().is_empty());
        assert!(matches!(
            lc.reservation_status("svc", "db", base()),
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_display_fields() {
        let lc = lifecycle();
        let t = base();
        lc.create_reservation(reservation_request(5, "minutes"), t).unwrap();
        lc.apply_checkin(pair("svc", "db"), t).unwrap();

        let status = &lc.list_reservations(t + Duration::minutes(3)).unwrap()[0];
        assert_eq!(status.time_since_last_checkin, "3 minutes ago");
        assert_eq!(status.last_checkin_str, "Fri, 01 Mar 2024 09:00:00 UTC");
        assert_eq!(status.snoozed_until, None);

        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["app"], "svc");
        assert_eq!(json["timeUnits"], "minutes");
        assert_eq!(json["failingSLA"], false);
        assert_eq!(json["numCheckins"], 1);
        assert_eq!(json["timeSinceLastCheckin"], "3 minutes ago");
    }

    #[test]
    fn test_request_aliases() {
        let req: ReservationRequest = serde_json::from_str(
            r#"{"app":"svc","component":"db","owner":"o","notify":"n","frequency":5,"time_units":"minutes","alert_msg":"down"}"#,
        )
        .unwrap();
        assert_eq!(req.time_units, "minutes");
        assert_eq!(req.alert_message.as_deref(), Some("down"));

        let req: SnoozeRequest =
            serde_json::from_str(r#"{"app":"svc","component":"db","duration":1,"timeUnits":"hours"}"#).unwrap();
        assert_eq!(req.duration, 1);
        assert_eq!(req.time_units, "hours");
    }
}
