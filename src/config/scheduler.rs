//! Scheduler configuration.

use serde::Deserialize;

/// When update cycles run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Daily full-cycle time, `HH:MM` in UTC.
    pub daily_at: String,
    /// Fixed full-cycle interval; replaces `daily_at` when set.
    pub interval_secs: Option<u64>,
    /// Interval for lighter alert-only cycles between full cycles.
    pub alert_interval_secs: Option<u64>,
    /// Run a full cycle immediately at startup.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_at: "00:00".to_string(),
            interval_secs: None,
            alert_interval_secs: None,
            run_on_start: false,
        }
    }
}
