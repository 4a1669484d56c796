//! Alert dispatcher configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default number of core slots.
pub const DEFAULT_MAX_CORES: usize = 8;

/// Whether dispatched workers are pinned to their slot's CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityMode {
    /// Restrict each worker process to the CPU matching its core slot.
    #[default]
    Pin,
    /// Let the OS schedule workers freely.
    None,
}

/// How a triggered alert's worker is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Separate OS process running `govsync-worker`.
    #[default]
    Process,
    /// Tokio task inside the scheduler process (no isolation, no pinning).
    Task,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of core slots (maximum concurrent workers).
    pub max_cores: usize,
    /// CPU pinning policy.
    pub affinity: AffinityMode,
    /// Worker execution mode.
    pub mode: WorkerMode,
    /// Sleep between free-slot scans when every slot is occupied.
    pub poll_interval_ms: u64,
    /// Watchdog: kill workers running longer than this.
    pub worker_timeout_secs: Option<u64>,
    /// Worker argv override. Defaults to `govsync-worker` next to the
    /// running executable.
    pub worker_command: Option<Vec<String>>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_cores: DEFAULT_MAX_CORES,
            affinity: AffinityMode::Pin,
            mode: WorkerMode::Process,
            poll_interval_ms: 1000,
            worker_timeout_secs: None,
            worker_command: None,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}
