//! Storage configuration types: relational database and registry files.

use std::path::PathBuf;

use serde::Deserialize;

use crate::registry::Collection;

/// Relational database backend discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Postgres,
    Sqlite,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::Postgres => write!(f, "postgres"),
            DatabaseType::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Relational database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub database_type: DatabaseType,
    /// Connection URL (`postgres://...` or `sqlite:...`).
    pub url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_type: DatabaseType::Postgres,
            url: "postgres://localhost:5432/govsync".to_string(),
            max_connections: 5,
        }
    }
}

/// Registry persistence configuration.
///
/// Each collection lives in its own JSON document under `dir`, so a damaged
/// file only empties that collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding the registry documents.
    pub dir: PathBuf,
    /// Table update jobs, keyed by table name.
    pub table_jobs_file: String,
    /// Materialized view names.
    pub views_file: String,
    /// Alert definitions, keyed by alert name.
    pub alerts_file: String,
    /// Fire-once ledger of alerts whose predicate is currently latched.
    pub ledger_file: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./config"),
            table_jobs_file: "update_registry.json".to_string(),
            views_file: "materialized_views.json".to_string(),
            alerts_file: "alerts.json".to_string(),
            ledger_file: "triggered_alerts.json".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Path of the document backing a collection.
    pub fn path_for(&self, collection: Collection) -> PathBuf {
        let file = match collection {
            Collection::TableJobs => &self.table_jobs_file,
            Collection::MaterializedViews => &self.views_file,
            Collection::Alerts => &self.alerts_file,
            Collection::AlertLedger => &self.ledger_file,
        };
        self.dir.join(file)
    }
}
