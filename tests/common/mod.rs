//! Shared fixtures for cycle integration tests.
//!
//! Everything runs in-process: in-memory SQLite, a scripted query service,
//! an in-memory registry, and in-process alert workers that record what
//! they were asked to handle.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use govsync::alerts::{AlertHandler, TriggeredAlert};
use govsync::config::FirePolicy;
use govsync::dispatch::{
    CoreTaskManager, DispatchError, TaskLauncher, WorkerHandle, WorkerLauncher,
};
use govsync::query::mock::MockQueryService;
use govsync::query::PaginatedQueryClient;
use govsync::registry::mock::MemoryRegistryStore;
use govsync::registry::{OrderedMap, TableUpdateJob, UpdateRegistry};
use govsync::services::{AlertEvaluator, UpdateCycle, UpdateExecutor};
use govsync::storage::{RelationalStore, SqliteStore};
use govsync::Row;

/// Alert handler that records every alert it receives.
#[derive(Default)]
pub struct RecordingHandler {
    handled: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertHandler for RecordingHandler {
    async fn handle(&self, alert: TriggeredAlert) -> govsync::alerts::Result<()> {
        self.handled.lock().unwrap().push(alert.alert_name);
        Ok(())
    }
}

/// Launcher whose workers never start.
pub struct FailingLauncher;

#[async_trait]
impl WorkerLauncher for FailingLauncher {
    async fn launch(
        &self,
        _alert: &TriggeredAlert,
        _core_id: usize,
    ) -> govsync::dispatch::Result<Box<dyn WorkerHandle>> {
        Err(DispatchError::Config("worker binary not found".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

pub struct Harness {
    pub cycle: UpdateCycle,
    pub service: Arc<MockQueryService>,
    pub store: Arc<SqliteStore>,
    pub registry_store: Arc<MemoryRegistryStore>,
    pub handler: Arc<RecordingHandler>,
}

impl Harness {
    pub async fn new(policy: FirePolicy) -> Self {
        let handler = Arc::new(RecordingHandler::default());
        let launcher = Arc::new(TaskLauncher::new(handler.clone()));
        Self::build(policy, launcher, handler).await
    }

    /// Harness whose alerts go through `launcher` instead of the recorder.
    pub async fn with_launcher(policy: FirePolicy, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::build(policy, launcher, Arc::new(RecordingHandler::default())).await
    }

    async fn build(
        policy: FirePolicy,
        launcher: Arc<dyn WorkerLauncher>,
        handler: Arc<RecordingHandler>,
    ) -> Self {
        let registry_store = Arc::new(MemoryRegistryStore::new());
        let registry = UpdateRegistry::open(registry_store.clone()).await;
        let service = Arc::new(MockQueryService::new());
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());

        let query = PaginatedQueryClient::new(service.clone()).with_page_size(2);
        let dispatcher = CoreTaskManager::new(2, launcher, Duration::from_millis(5));

        let cycle = UpdateCycle::new(
            registry,
            UpdateExecutor::new(query, store.clone()),
            AlertEvaluator::new(store.clone(), policy),
            dispatcher,
        );

        Self {
            cycle,
            service,
            store,
            registry_store,
            handler,
        }
    }

    /// Create `table`, script its update query, and register the job.
    pub async fn add_table(&mut self, table: &str, rows: Vec<Row>) -> TableUpdateJob {
        let query = format!("SELECT * FROM warehouse.{}", table);
        let job = TableUpdateJob::new(table, query.clone(), balance_columns(), "account");
        self.store.create_table(&job).await.unwrap();
        self.service.add_query(&query, rows);
        self.cycle
            .registry_mut()
            .register_table_update(job.clone())
            .await
            .unwrap();
        job
    }
}

pub fn balance_columns() -> OrderedMap<String> {
    [
        ("account", "TEXT".to_string()),
        ("balance", "REAL".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

pub fn balance(account: &str, amount: f64) -> Row {
    let mut row = Row::new();
    row.insert("account".to_string(), json!(account));
    row.insert("balance".to_string(), json!(amount));
    row
}
