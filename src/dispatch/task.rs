//! In-process workers on the tokio runtime.
//!
//! No process isolation and no CPU pinning; a panicking handler only ends
//! its own task. Used for tests and single-binary deployments.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{Result, WorkerHandle, WorkerLauncher};
use crate::alerts::{AlertHandler, TriggeredAlert};

/// Runs each alert through `handler` on its own task.
pub struct TaskLauncher {
    handler: Arc<dyn AlertHandler>,
}

impl TaskLauncher {
    pub fn new(handler: Arc<dyn AlertHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl WorkerLauncher for TaskLauncher {
    async fn launch(&self, alert: &TriggeredAlert, _core_id: usize) -> Result<Box<dyn WorkerHandle>> {
        let handler = Arc::clone(&self.handler);
        let alert = alert.clone();

        let handle = tokio::spawn(async move {
            let name = alert.alert_name.clone();
            if let Err(e) = handler.handle(alert).await {
                warn!(alert = %name, error = %e, "Alert worker failed");
            }
        });

        Ok(Box::new(TaskWorker { handle }))
    }

    fn name(&self) -> &str {
        "task"
    }
}

struct TaskWorker {
    handle: JoinHandle<()>,
}

#[async_trait]
impl WorkerHandle for TaskWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        !self.handle.is_finished()
    }

    async fn wait(&mut self) {
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                warn!(error = %e, "Alert worker panicked");
            }
        }
    }

    async fn kill(&mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}
