//! Update executor: refresh every registered table from the query service,
//! then every materialized view.
//!
//! Jobs run in registration order, each in its own transaction. A failed
//! fetch or write is logged and recorded; the remaining jobs and views still
//! run.

use std::sync::Arc;

use tracing::{error, info};

use crate::query::PaginatedQueryClient;
use crate::registry::{TableUpdateJob, UpdateRegistry};
use crate::storage::{RelationalStore, UpsertReport};

/// What happened to one table job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Rows fetched and committed.
    Updated { fetched: usize, upsert: UpsertReport },
    /// The query service fetch failed; nothing was written.
    FetchFailed(String),
    /// The write failed and was rolled back.
    StoreFailed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Updated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub table_name: String,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewReport {
    pub name: String,
    /// `None` when the refresh committed.
    pub error: Option<String>,
}

/// Outcome of one update pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub jobs: Vec<JobReport>,
    pub views: Vec<ViewReport>,
}

impl UpdateReport {
    pub fn jobs_failed(&self) -> usize {
        self.jobs.iter().filter(|j| !j.outcome.is_success()).count()
    }

    pub fn views_failed(&self) -> usize {
        self.views.iter().filter(|v| v.error.is_some()).count()
    }
}

/// Runs table jobs and view refreshes against the relational store.
pub struct UpdateExecutor {
    query: PaginatedQueryClient,
    store: Arc<dyn RelationalStore>,
}

impl UpdateExecutor {
    pub fn new(query: PaginatedQueryClient, store: Arc<dyn RelationalStore>) -> Self {
        Self { query, store }
    }

    pub fn store(&self) -> Arc<dyn RelationalStore> {
        Arc::clone(&self.store)
    }

    /// Every table job, then every view. Views never interleave with jobs.
    pub async fn execute_updates(&self, registry: &UpdateRegistry) -> UpdateReport {
        let mut report = UpdateReport::default();

        for job in registry.table_jobs() {
            report.jobs.push(self.run_table_job(job).await);
        }

        report.views = self.refresh_views(registry).await;
        report
    }

    /// Fetch a job's rows and upsert them.
    pub async fn run_table_job(&self, job: &TableUpdateJob) -> JobReport {
        let outcome = match self.query.run_query(&job.update_query).await {
            Err(e) => {
                error!(table = %job.table_name, error = %e, "Failed to fetch table update");
                JobOutcome::FetchFailed(e.to_string())
            }
            Ok(rows) => match self.store.upsert_rows(job, &rows).await {
                Ok(upsert) => {
                    info!(
                        table = %job.table_name,
                        fetched = rows.len(),
                        inserted = upsert.inserted,
                        ignored = upsert.ignored,
                        skipped = upsert.skipped,
                        "Table updated"
                    );
                    JobOutcome::Updated {
                        fetched: rows.len(),
                        upsert,
                    }
                }
                Err(e) => {
                    error!(table = %job.table_name, fetched = rows.len(), error = %e, "Failed to write table update");
                    JobOutcome::StoreFailed(e.to_string())
                }
            },
        };

        JobReport {
            table_name: job.table_name.clone(),
            outcome,
        }
    }

    /// Refresh every registered view, each with its own commit.
    pub async fn refresh_views(&self, registry: &UpdateRegistry) -> Vec<ViewReport> {
        let mut reports = Vec::with_capacity(registry.materialized_views().len());
        for name in registry.materialized_views() {
            let error = match self.store.refresh_materialized_view(name).await {
                Ok(()) => {
                    info!(view = %name, "Materialized view refreshed");
                    None
                }
                Err(e) => {
                    error!(view = %name, error = %e, "Failed to refresh materialized view");
                    Some(e.to_string())
                }
            };
            reports.push(ViewReport {
                name: name.clone(),
                error,
            });
        }
        reports
    }
}
