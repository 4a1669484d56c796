//! Alert dispatcher: a fixed set of core slots, each running at most one
//! alert worker.
//!
//! Dispatch scans for the first slot without a live occupant and launches a
//! worker there, sleeping between scans while every slot is busy. A slot is
//! freed once a liveness check finds its worker gone; a crashed worker looks
//! the same as a finished one. [`CoreTaskManager::join_all`] is the barrier
//! the update cycle waits on before the next cycle may start.

mod affinity;
mod process;
mod task;

pub use affinity::{cpu_for_core, pin_to_core};
pub use process::{default_worker_command, ProcessLauncher, WorkerProcess};
pub use task::TaskLauncher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alerts::{AlertError, TriggeredAlert};
use crate::config::DispatchConfig;

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while launching workers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Failed to encode alert: {0}")]
    Encode(#[from] AlertError),

    #[error("CPU affinity error: {0}")]
    Affinity(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A running alert worker.
#[async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, when the worker is a process.
    fn pid(&self) -> Option<u32>;

    /// Liveness check; `false` once the worker has exited for any reason.
    fn is_alive(&mut self) -> bool;

    /// Wait for the worker to exit.
    async fn wait(&mut self);

    /// Force-terminate the worker.
    async fn kill(&mut self);
}

/// Starts workers for triggered alerts.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, alert: &TriggeredAlert, core_id: usize) -> Result<Box<dyn WorkerHandle>>;

    fn name(&self) -> &str;
}

struct Occupant {
    alert_name: String,
    started: Instant,
    handle: Box<dyn WorkerHandle>,
}

/// One execution slot. EMPTY -> ASSIGNED -> EMPTY.
pub struct CoreSlot {
    core_id: usize,
    occupant: Option<Occupant>,
}

impl CoreSlot {
    fn new(core_id: usize) -> Self {
        Self {
            core_id,
            occupant: None,
        }
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    pub fn is_empty(&self) -> bool {
        self.occupant.is_none()
    }

    /// Name of the alert currently assigned to this slot.
    pub fn occupant(&self) -> Option<&str> {
        self.occupant.as_ref().map(|o| o.alert_name.as_str())
    }

    /// Free the slot if its worker has exited.
    fn reap(&mut self) {
        let finished = match self.occupant.as_mut() {
            Some(occupant) => !occupant.handle.is_alive(),
            None => false,
        };
        if finished {
            if let Some(occupant) = self.occupant.take() {
                info!(
                    core_id = self.core_id,
                    alert = %occupant.alert_name,
                    pid = ?occupant.handle.pid(),
                    elapsed_ms = occupant.started.elapsed().as_millis() as u64,
                    "Worker finished"
                );
            }
        }
    }

    /// Kill the worker if it has run longer than `timeout`.
    async fn enforce_timeout(&mut self, timeout: Duration) {
        let overdue = self
            .occupant
            .as_ref()
            .map(|o| o.started.elapsed() >= timeout)
            .unwrap_or(false);
        if overdue {
            if let Some(mut occupant) = self.occupant.take() {
                warn!(
                    core_id = self.core_id,
                    alert = %occupant.alert_name,
                    pid = ?occupant.handle.pid(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Worker exceeded its runtime limit, killing"
                );
                occupant.handle.kill().await;
            }
        }
    }
}

/// Assigns triggered alerts to core slots.
pub struct CoreTaskManager {
    slots: Vec<CoreSlot>,
    launcher: Arc<dyn WorkerLauncher>,
    poll_interval: Duration,
    worker_timeout: Option<Duration>,
}

impl CoreTaskManager {
    pub fn new(max_cores: usize, launcher: Arc<dyn WorkerLauncher>, poll_interval: Duration) -> Self {
        Self {
            slots: (0..max_cores.max(1)).map(CoreSlot::new).collect(),
            launcher,
            poll_interval,
            worker_timeout: None,
        }
    }

    pub fn from_config(config: &DispatchConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::new(config.max_cores, launcher, config.poll_interval())
            .with_worker_timeout(config.worker_timeout())
    }

    /// Kill workers that run longer than `timeout`.
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn max_cores(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[CoreSlot] {
        &self.slots
    }

    /// Number of slots with a live worker.
    pub fn occupied(&mut self) -> usize {
        self.reap();
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    fn reap(&mut self) {
        for slot in &mut self.slots {
            slot.reap();
        }
    }

    async fn enforce_timeouts(&mut self) {
        if let Some(timeout) = self.worker_timeout {
            for slot in &mut self.slots {
                slot.enforce_timeout(timeout).await;
            }
        }
    }

    /// Launch a worker for `alert` on the first free slot, waiting for one
    /// to free up if necessary. Returns the slot's core id.
    pub async fn dispatch(&mut self, alert: TriggeredAlert) -> Result<usize> {
        let mut waiting = false;
        loop {
            self.reap();
            self.enforce_timeouts().await;

            if let Some(slot) = self.slots.iter_mut().find(|s| s.is_empty()) {
                let core_id = slot.core_id;
                let handle = self.launcher.launch(&alert, core_id).await?;
                info!(
                    core_id,
                    alert = %alert.alert_name,
                    pid = ?handle.pid(),
                    launcher = self.launcher.name(),
                    "Worker started"
                );
                slot.occupant = Some(Occupant {
                    alert_name: alert.alert_name,
                    started: Instant::now(),
                    handle,
                });
                return Ok(core_id);
            }

            if !waiting {
                debug!(alert = %alert.alert_name, "All core slots busy, waiting");
                waiting = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait for every outstanding worker. Workers past the runtime limit are
    /// killed. Returns the number of workers waited on.
    pub async fn join_all(&mut self) -> usize {
        let mut joined = 0;
        for slot in &mut self.slots {
            let Some(mut occupant) = slot.occupant.take() else {
                continue;
            };
            joined += 1;

            match self.worker_timeout {
                Some(timeout) => {
                    let remaining = timeout.saturating_sub(occupant.started.elapsed());
                    if tokio::time::timeout(remaining, occupant.handle.wait())
                        .await
                        .is_err()
                    {
                        warn!(
                            core_id = slot.core_id,
                            alert = %occupant.alert_name,
                            pid = ?occupant.handle.pid(),
                            "Worker exceeded its runtime limit, killing"
                        );
                        occupant.handle.kill().await;
                        continue;
                    }
                }
                None => occupant.handle.wait().await,
            }

            info!(
                core_id = slot.core_id,
                alert = %occupant.alert_name,
                pid = ?occupant.handle.pid(),
                elapsed_ms = occupant.started.elapsed().as_millis() as u64,
                "Worker finished"
            );
        }
        joined
    }
}

#[cfg(test)]
mod tests;
