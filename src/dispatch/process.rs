//! Worker processes.
//!
//! Each triggered alert runs in its own `govsync-worker` process, placed in
//! a fresh process group so a kill reaches anything it spawned. The alert is
//! passed as JSON in the environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use super::{pin_to_core, DispatchError, Result, WorkerHandle, WorkerLauncher};
use crate::alerts::TriggeredAlert;
use crate::config::{AffinityMode, DispatchConfig, CORE_ID_ENV_VAR, TRIGGERED_ALERT_ENV_VAR};

/// Worker executable name, looked up next to the running binary.
const WORKER_BINARY: &str = "govsync-worker";

/// `govsync-worker` beside the current executable, or on `PATH`.
pub fn default_worker_command() -> Vec<String> {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
        .filter(|path| path.exists());

    let executable = sibling
        .unwrap_or_else(|| PathBuf::from(WORKER_BINARY))
        .to_string_lossy()
        .into_owned();
    vec![executable]
}

/// Launches each alert in its own OS process.
pub struct ProcessLauncher {
    command: Vec<String>,
    affinity: AffinityMode,
    env: HashMap<String, String>,
}

impl ProcessLauncher {
    pub fn new(command: Vec<String>, affinity: AffinityMode) -> Result<Self> {
        if command.is_empty() {
            return Err(DispatchError::Config(
                "worker command cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            command,
            affinity,
            env: HashMap::new(),
        })
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let command = config
            .worker_command
            .clone()
            .unwrap_or_else(default_worker_command);
        Self::new(command, config.affinity)
    }

    /// Extra environment for every worker.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, alert: &TriggeredAlert, core_id: usize) -> Result<Box<dyn WorkerHandle>> {
        let mut env = self.env.clone();
        env.insert(TRIGGERED_ALERT_ENV_VAR.to_string(), alert.to_json()?);
        env.insert(CORE_ID_ENV_VAR.to_string(), core_id.to_string());

        let worker = WorkerProcess::spawn(&alert.alert_name, &self.command, &env)?;

        if self.affinity == AffinityMode::Pin {
            if let Some(pid) = worker.pid() {
                match pin_to_core(pid, core_id) {
                    Ok(cpu) => info!(alert = %alert.alert_name, pid, core_id, cpu, "Worker pinned"),
                    Err(e) => warn!(alert = %alert.alert_name, pid, core_id, error = %e, "Failed to pin worker, running unpinned"),
                }
            }
        }

        Ok(Box::new(worker))
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// A spawned worker process.
pub struct WorkerProcess {
    child: Child,
    name: String,
}

impl WorkerProcess {
    /// Spawn from a command array. No shell interpretation.
    pub fn spawn(name: &str, command: &[String], env: &HashMap<String, String>) -> Result<Self> {
        let (executable, args) = command.split_first().ok_or_else(|| {
            DispatchError::Config("worker command cannot be empty".to_string())
        })?;

        let mut cmd = Command::new(executable);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            error!(alert = %name, executable = %executable, error = %e, "Failed to spawn worker");
            e
        })?;

        Ok(Self {
            child,
            name: name.to_string(),
        })
    }

    #[cfg(unix)]
    fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
            warn!(pid, ?signal, error = %e, "Failed to signal worker process group");
        }
    }
}

#[async_trait]
impl WorkerHandle for WorkerProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    warn!(alert = %self.name, status = ?status, "Worker exited with failure");
                }
                false
            }
            Err(e) => {
                error!(alert = %self.name, error = %e, "Failed to check worker status");
                false
            }
        }
    }

    async fn wait(&mut self) {
        match self.child.wait().await {
            Ok(status) if !status.success() => {
                warn!(alert = %self.name, status = ?status, "Worker exited with failure")
            }
            Ok(_) => {}
            Err(e) => warn!(alert = %self.name, error = %e, "Error waiting for worker"),
        }
    }

    /// SIGTERM the process group, then SIGKILL if it does not exit.
    async fn kill(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        info!(alert = %self.name, pid, "Killing worker");

        #[cfg(unix)]
        Self::signal_group(pid, nix::sys::signal::Signal::SIGTERM);
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => info!(alert = %self.name, status = ?status, "Worker exited"),
            Ok(Err(e)) => warn!(alert = %self.name, error = %e, "Error waiting for worker"),
            Err(_) => {
                warn!(alert = %self.name, "Worker didn't exit gracefully, sending SIGKILL");
                #[cfg(unix)]
                Self::signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                let _ = self.child.kill().await;
            }
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Some(pid) = self.child.id() {
                warn!(alert = %self.name, pid, "Killing orphaned worker on drop");
                #[cfg(unix)]
                Self::signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            }
            let _ = self.child.start_kill();
        }
    }
}
