//! One update cycle: reload the registry, refresh tables and views, evaluate
//! alerts, dispatch the ones that fired, and wait for every worker.
//!
//! The cycle returns only after all of its workers are gone, so a scheduler
//! awaiting it can never overlap two cycles.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::{AlertEvaluator, ServiceError, UpdateExecutor, UpdateReport};
use crate::alerts::AlertProcessor;
use crate::config::{Config, WorkerMode, CONFIG_ENV_VAR};
use crate::dispatch::{CoreTaskManager, ProcessLauncher, TaskLauncher, WorkerLauncher};
use crate::query::{FlipsideClient, PaginatedQueryClient};
use crate::registry::{FilesystemRegistryStore, UpdateRegistry};
use crate::storage::init_database;

/// Which phases a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Table jobs, view refreshes, then alerts.
    Full,
    /// Alerts only, against whatever the tables currently hold.
    AlertsOnly,
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleKind::Full => write!(f, "full"),
            CycleKind::AlertsOnly => write!(f, "alerts-only"),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` for alert-only cycles.
    pub updates: Option<UpdateReport>,
    /// Alerts whose predicate fired, in dispatch order.
    pub fired: Vec<String>,
    pub suppressed: Vec<String>,
    /// Alerts whose predicate query failed.
    pub failed_alerts: Vec<String>,
    /// Fired alerts whose worker could not be started.
    pub dispatch_failures: Vec<String>,
    pub workers_joined: usize,
}

/// Owns everything a cycle needs.
pub struct UpdateCycle {
    registry: UpdateRegistry,
    executor: UpdateExecutor,
    evaluator: AlertEvaluator,
    dispatcher: CoreTaskManager,
}

impl UpdateCycle {
    pub fn new(
        registry: UpdateRegistry,
        executor: UpdateExecutor,
        evaluator: AlertEvaluator,
        dispatcher: CoreTaskManager,
    ) -> Self {
        Self {
            registry,
            executor,
            evaluator,
            dispatcher,
        }
    }

    /// Wire a cycle from configuration: filesystem registry, configured
    /// database, Flipside query service, and the configured worker mode.
    ///
    /// `config_path` is forwarded to worker processes so they load the same
    /// configuration.
    pub async fn from_config(config: &Config, config_path: Option<&Path>) -> Result<Self, ServiceError> {
        let registry_store = FilesystemRegistryStore::new(config.registry.clone()).await?;
        let registry = UpdateRegistry::open(Arc::new(registry_store)).await;

        let store = init_database(&config.database).await?;

        let service = FlipsideClient::new(&config.query_service)?;
        let query = PaginatedQueryClient::new(Arc::new(service))
            .with_page_size(config.query_service.page_size);

        let launcher: Arc<dyn WorkerLauncher> = match config.dispatch.mode {
            WorkerMode::Process => {
                let mut launcher = ProcessLauncher::from_config(&config.dispatch)?;
                if let Some(path) = config_path {
                    launcher = launcher.with_env(CONFIG_ENV_VAR, path.to_string_lossy());
                }
                Arc::new(launcher)
            }
            WorkerMode::Task => {
                let processor = AlertProcessor::from_config(&config.alerts, Arc::clone(&store))?;
                Arc::new(TaskLauncher::new(Arc::new(processor)))
            }
        };

        Ok(Self::new(
            registry,
            UpdateExecutor::new(query, Arc::clone(&store)),
            AlertEvaluator::new(Arc::clone(&store), config.alerts.fire_policy),
            CoreTaskManager::from_config(&config.dispatch, launcher),
        ))
    }

    pub fn registry(&self) -> &UpdateRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut UpdateRegistry {
        &mut self.registry
    }

    pub fn executor(&self) -> &UpdateExecutor {
        &self.executor
    }

    /// Run one cycle to completion, including every dispatched worker.
    pub async fn run(&mut self, kind: CycleKind) -> CycleReport {
        let started_at = Utc::now();
        info!(kind = %kind, "Cycle starting");

        self.registry.reload().await;

        let updates = match kind {
            CycleKind::Full => Some(self.executor.execute_updates(&self.registry).await),
            CycleKind::AlertsOnly => None,
        };

        let evaluation = self.evaluator.evaluate(&self.registry).await;

        let mut dispatched = Vec::with_capacity(evaluation.fired.len());
        let mut dispatch_failures = Vec::new();
        for alert in evaluation.fired {
            match self.dispatcher.dispatch(alert.clone()).await {
                Ok(_) => dispatched.push(alert),
                Err(e) => {
                    error!(alert = %alert.alert_name, error = %e, "Failed to dispatch alert");
                    dispatch_failures.push(alert.alert_name);
                }
            }
        }
        self.evaluator
            .record_dispatched(&self.registry, &dispatched)
            .await;
        let fired = dispatched.into_iter().map(|a| a.alert_name).collect();

        let workers_joined = self.dispatcher.join_all().await;

        let report = CycleReport {
            kind,
            started_at,
            finished_at: Utc::now(),
            updates,
            fired,
            suppressed: evaluation.suppressed,
            failed_alerts: evaluation.failed.into_iter().map(|(name, _)| name).collect(),
            dispatch_failures,
            workers_joined,
        };

        info!(
            kind = %kind,
            jobs = report.updates.as_ref().map(|u| u.jobs.len()).unwrap_or(0),
            jobs_failed = report.updates.as_ref().map(|u| u.jobs_failed()).unwrap_or(0),
            views = report.updates.as_ref().map(|u| u.views.len()).unwrap_or(0),
            views_failed = report.updates.as_ref().map(|u| u.views_failed()).unwrap_or(0),
            alerts_fired = report.fired.len(),
            alerts_suppressed = report.suppressed.len(),
            alerts_failed = report.failed_alerts.len(),
            workers = report.workers_joined,
            elapsed_ms = (report.finished_at - started_at).num_milliseconds(),
            "Cycle finished"
        );
        report
    }
}
