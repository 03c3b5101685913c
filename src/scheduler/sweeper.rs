//! Alert sweeper: records SLA failures and prunes expired snoozes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::monitor::{Lifecycle, LifecycleError};

const DEFAULT_ALERT_MESSAGE: &str = "missed its checkin window";

/// What a single sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned_snoozes: usize,
    pub alerts_raised: usize,
}

/// Background task that acts on failing reservations.
///
/// Only the coordinator raises alerts; every node prunes expired snoozes.
pub struct AlertSweeper {
    lifecycle: Arc<Lifecycle>,
    coordinator: bool,
    interval: Duration,
}

impl AlertSweeper {
    pub fn new(lifecycle: Arc<Lifecycle>, coordinator: bool, interval: Duration) -> Self {
        Self {
            lifecycle,
            coordinator,
            interval,
        }
    }

    /// Start the sweeper background task.
    pub fn start(&self) -> JoinHandle<()> {
        let lifecycle = self.lifecycle.clone();
        let coordinator = self.coordinator;
        let period = self.interval;

        tracing::info!(
            "Starting alert sweeper every {:?} (coordinator: {})",
            self.interval,
            coordinator
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let lifecycle = lifecycle.clone();
                let result = tokio::task::spawn_blocking(move || sweep(&lifecycle, coordinator, Utc::now())).await;

                match result {
                    Ok(Ok(report)) if report != SweepReport::default() => {
                        tracing::debug!(
                            "AlertSweeper: pruned {} snoozes, raised {} alerts",
                            report.pruned_snoozes,
                            report.alerts_raised
                        );
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!("AlertSweeper: sweep failed: {}", e),
                    Err(e) => tracing::error!("AlertSweeper: sweep task panicked: {}", e),
                }
            }
        })
    }
}

/// Run one sweep at `now`.
///
/// Each failing reservation is alerted on at most once per missed checkin.
pub fn sweep(lifecycle: &Lifecycle, coordinator: bool, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
    let store = lifecycle.store();
    let mut report = SweepReport {
        pruned_snoozes: store.prune_expired_snoozes(now.timestamp())?,
        ..Default::default()
    };

    if !coordinator {
        return Ok(report);
    }

    for status in lifecycle.list_reservations(now)? {
        if !status.failing_sla {
            continue;
        }

        let res = &status.reservation;
        if !store.record_alert(res, now.timestamp())? {
            continue;
        }

        report.alerts_raised += 1;
        tracing::warn!(
            "ALERT app [{}] component [{}] {} (last checkin {}, owner [{}], notify [{}])",
            res.app,
            res.component,
            res.alert_message.as_deref().unwrap_or(DEFAULT_ALERT_MESSAGE),
            status.time_since_last_checkin,
            res.owner,
            res.notify
        );
    }

    Ok(report)
}
