//! Relational store holding refreshed tables, materialized views, and the
//! data alert predicates run against.
//!
//! Table, view, and column identifiers come verbatim from the registry and
//! are interpolated into SQL unquoted. Registry input is operator-controlled.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::config::{DatabaseConfig, DatabaseType};
use crate::registry::TableUpdateJob;
use crate::Row;

mod sql;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Result type for relational store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in relational store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown materialized view: {0}")]
    UnknownView(String),

    #[error("Malformed row: {0}")]
    Malformed(String),

    #[error("Storage backend not enabled: {0}")]
    BackendDisabled(String),
}

/// Outcome of upserting one job's rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows written.
    pub inserted: u64,
    /// Rows whose primary key already existed (left unchanged).
    pub ignored: u64,
    /// Rows missing a declared column.
    pub skipped: u64,
}

impl UpsertReport {
    pub fn total(&self) -> u64 {
        self.inserted + self.ignored + self.skipped
    }
}

/// SQL execution surface the update cycle and alert workers depend on.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Create the job's target table if it does not exist.
    async fn create_table(&self, job: &TableUpdateJob) -> Result<()>;

    /// Insert rows keyed by the job's primary key, ignoring conflicts.
    ///
    /// All rows are written in one transaction. A row missing a declared
    /// column is skipped and counted; a database error rolls back the job.
    async fn upsert_rows(&self, job: &TableUpdateJob, rows: &[Row]) -> Result<UpsertReport>;

    /// Create and populate a materialized view.
    async fn create_materialized_view(&self, name: &str, query_text: &str) -> Result<()>;

    /// Recompute a materialized view from its defining query.
    async fn refresh_materialized_view(&self, name: &str) -> Result<()>;

    /// Run a query and return the first column of its first row, if any.
    async fn evaluate_predicate(&self, query_text: &str) -> Result<Option<Value>>;

    /// Run a query and return all rows with columns in select order.
    async fn fetch_rows(&self, query_text: &str) -> Result<Vec<Row>>;
}

/// Interpret a predicate result as a boolean.
///
/// Null and missing values are false. Strings are false when empty or one
/// of `0`, `f`, `false`, `no`, `n` (case-insensitive). Arrays and objects
/// are true when non-empty.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => {
            let s = s.trim();
            !(s.is_empty()
                || ["0", "f", "false", "no", "n"]
                    .iter()
                    .any(|falsy| s.eq_ignore_ascii_case(falsy)))
        }
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// Connect to the configured relational database.
pub async fn init_database(config: &DatabaseConfig) -> Result<Arc<dyn RelationalStore>> {
    info!(backend = %config.database_type, "Connecting relational store");

    match config.database_type {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await?;
            Ok(Arc::new(PostgresStore::new(pool)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let store = SqliteStore::connect(&config.url, config.max_connections).await?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => {
            error!(backend = %other, "Storage backend requested but its feature is not enabled");
            Err(StorageError::BackendDisabled(other.to_string()))
        }
    }
}
