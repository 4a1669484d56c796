//! Cycle scheduler.
//!
//! Full cycles run once a day at a fixed UTC time (midnight by default) or
//! on a fixed interval; lighter alert-only cycles can run in between. Each
//! cycle is awaited to completion before the next run time is computed, so
//! cycles never overlap.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{info, warn};

use super::{CycleKind, ServiceError, UpdateCycle};
use crate::config::SchedulerConfig;

/// When full cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every day at this UTC time.
    Daily(NaiveTime),
    /// Every fixed interval.
    Interval(Duration),
}

impl Schedule {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, ServiceError> {
        if let Some(secs) = config.interval_secs {
            return Ok(Schedule::Interval(Duration::from_secs(secs)));
        }
        let time = NaiveTime::parse_from_str(config.daily_at.trim(), "%H:%M").map_err(|e| {
            ServiceError::Schedule(format!("invalid daily_at '{}': {}", config.daily_at, e))
        })?;
        Ok(Schedule::Daily(time))
    }

    /// The first run strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Daily(time) => {
                let today = now.date_naive().and_time(*time).and_utc();
                if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                }
            }
            Schedule::Interval(interval) => add(now, *interval),
        }
    }
}

/// Drives an [`UpdateCycle`] on its schedule.
pub struct Scheduler {
    schedule: Schedule,
    alert_interval: Option<Duration>,
    run_on_start: bool,
    cycle: UpdateCycle,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, cycle: UpdateCycle) -> Result<Self, ServiceError> {
        Ok(Self {
            schedule: Schedule::from_config(config)?,
            alert_interval: config.alert_interval_secs.map(Duration::from_secs),
            run_on_start: config.run_on_start,
            cycle,
        })
    }

    /// Run until `shutdown` resolves. Shutdown is only observed between
    /// cycles; a running cycle finishes first.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let now = Utc::now();
        let mut next_full = if self.run_on_start {
            now
        } else {
            self.schedule.next_after(now)
        };
        let mut next_alerts = self.alert_interval.map(|i| add(now, i));

        info!(schedule = ?self.schedule, next_full = %next_full, "Scheduler started");

        loop {
            let (when, kind) = next_run(next_full, next_alerts);
            let delay = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let report = self.cycle.run(kind).await;
            if !report.dispatch_failures.is_empty() {
                warn!(alerts = ?report.dispatch_failures, "Some alerts could not be dispatched");
            }

            let now = Utc::now();
            if kind == CycleKind::Full {
                next_full = self.schedule.next_after(now);
            }
            // A full cycle evaluates alerts too, so either kind restarts the alert timer
            next_alerts = self.alert_interval.map(|i| add(now, i));
            info!(next_full = %next_full, next_alerts = ?next_alerts, "Next cycles scheduled");
        }
    }
}

fn add(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Earliest pending run; a full cycle wins ties.
fn next_run(next_full: DateTime<Utc>, next_alerts: Option<DateTime<Utc>>) -> (DateTime<Utc>, CycleKind) {
    match next_alerts {
        Some(alerts) if alerts < next_full => (alerts, CycleKind::AlertsOnly),
        _ => (next_full, CycleKind::Full),
    }
}
