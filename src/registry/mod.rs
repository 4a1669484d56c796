//! Update registry: table refresh jobs, materialized views and alerts.
//!
//! The registry is a cache over a [`RegistryStore`]. Every collection is
//! loaded independently, so a missing or malformed document degrades to an
//! empty collection instead of failing the whole registry. Registrations are
//! upserts keyed by name, validated before they are persisted.

mod filesystem;
mod ledger;
pub mod mock;
mod store;

pub use filesystem::FilesystemRegistryStore;
pub use ledger::AlertLedger;
pub use store::{Collection, RegistryStore};

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Name-keyed map that keeps registration order through save and load.
pub type OrderedMap<V> = IndexMap<String, V>;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid registration for '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

impl RegistryError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        RegistryError::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A raw table refreshed from the analytical query service every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUpdateJob {
    /// Target table, used verbatim in SQL.
    pub table_name: String,
    /// Query text in the warehouse's dialect.
    pub update_query: String,
    /// Column name to declared SQL type, in table order.
    pub columns: OrderedMap<String>,
    /// Conflict target for the upsert.
    pub primary_key: String,
}

impl TableUpdateJob {
    pub fn new(
        table_name: impl Into<String>,
        update_query: impl Into<String>,
        columns: OrderedMap<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            update_query: update_query.into(),
            columns,
            primary_key: primary_key.into(),
        }
    }

    /// Structural checks; the query text itself stays opaque.
    pub fn validate(&self) -> Result<()> {
        let name = &self.table_name;
        if name.trim().is_empty() {
            return Err(RegistryError::invalid(name, "table name is empty"));
        }
        if self.update_query.trim().is_empty() {
            return Err(RegistryError::invalid(name, "update query is empty"));
        }
        if self.columns.is_empty() {
            return Err(RegistryError::invalid(name, "column map is empty"));
        }
        if let Some((col, _)) = self.columns.iter().find(|(_, ty)| ty.trim().is_empty()) {
            return Err(RegistryError::invalid(
                name,
                format!("column '{}' has no declared type", col),
            ));
        }
        if !self.columns.contains_key(&self.primary_key) {
            return Err(RegistryError::invalid(
                name,
                format!("primary key '{}' is not a declared column", self.primary_key),
            ));
        }
        Ok(())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// Stored shape of a table job (the name is the document key).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableJobDocument {
    update_query: String,
    columns: OrderedMap<String>,
    primary_key: String,
}

/// A follow-up query run by an alert worker to build chart data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AdditionalQueryRepr")]
pub struct AdditionalQuery {
    pub query_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl AdditionalQuery {
    /// A bare query with no chart hints.
    pub fn sql(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            graph_type: None,
            output_columns: Vec::new(),
            title: None,
        }
    }
}

/// Accepts either a plain SQL string or a full descriptor object.
#[derive(Deserialize)]
#[serde(untagged)]
enum AdditionalQueryRepr {
    Sql(String),
    Descriptor {
        query_text: String,
        #[serde(default)]
        graph_type: Option<String>,
        #[serde(default)]
        output_columns: Vec<String>,
        #[serde(default)]
        title: Option<String>,
    },
}

impl From<AdditionalQueryRepr> for AdditionalQuery {
    fn from(repr: AdditionalQueryRepr) -> Self {
        match repr {
            AdditionalQueryRepr::Sql(query_text) => AdditionalQuery::sql(query_text),
            AdditionalQueryRepr::Descriptor {
                query_text,
                graph_type,
                output_columns,
                title,
            } => AdditionalQuery {
                query_text,
                graph_type,
                output_columns,
                title,
            },
        }
    }
}

/// Side-effect description handed to the alert worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_prompt_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_prompt_info: Option<String>,
    pub additional_queries: Vec<AdditionalQuery>,
}

/// A registered boolean predicate plus what to do when it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDefinition {
    pub name: String,
    /// SQL whose first column of the first row is read as a boolean.
    pub predicate_query: String,
    pub metadata: AlertMetadata,
}

impl AlertDefinition {
    pub fn new(
        name: impl Into<String>,
        predicate_query: impl Into<String>,
        metadata: AlertMetadata,
    ) -> Self {
        Self {
            name: name.into(),
            predicate_query: predicate_query.into(),
            metadata,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::invalid(&self.name, "alert name is empty"));
        }
        if self.predicate_query.trim().is_empty() {
            return Err(RegistryError::invalid(&self.name, "predicate query is empty"));
        }
        if let Some(idx) = self
            .metadata
            .additional_queries
            .iter()
            .position(|q| q.query_text.trim().is_empty())
        {
            return Err(RegistryError::invalid(
                &self.name,
                format!("additional query {} is empty", idx + 1),
            ));
        }
        Ok(())
    }
}

/// Stored shape of an alert (the name is the document key).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlertDocument {
    alert_sql: String,
    #[serde(default)]
    metadata: AlertMetadata,
}

/// Load a collection, degrading to the empty value on any failure.
async fn load_or_empty<T>(store: &dyn RegistryStore, collection: Collection) -> T
where
    T: DeserializeOwned + Default,
{
    match store.load(collection).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(collection = %collection, error = %e, "Registry collection has unexpected shape, treating as empty");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!(collection = %collection, error = %e, "Failed to load registry collection, treating as empty");
            T::default()
        }
    }
}

/// Cached view of every registry collection.
///
/// Construct once and inject into the executor and evaluator; call
/// [`UpdateRegistry::reload`] to pick up registrations made by other
/// processes.
pub struct UpdateRegistry {
    store: Arc<dyn RegistryStore>,
    table_jobs: OrderedMap<TableUpdateJob>,
    views: Vec<String>,
    alerts: OrderedMap<AlertDefinition>,
}

impl UpdateRegistry {
    /// Open a registry and load every collection from `store`.
    pub async fn open(store: Arc<dyn RegistryStore>) -> Self {
        let mut registry = Self {
            store,
            table_jobs: OrderedMap::new(),
            views: Vec::new(),
            alerts: OrderedMap::new(),
        };
        registry.reload().await;
        registry
    }

    /// Re-read every collection from the backing store.
    pub async fn reload(&mut self) {
        let store = self.store.as_ref();

        let jobs: OrderedMap<TableJobDocument> = load_or_empty(store, Collection::TableJobs).await;
        self.table_jobs = jobs
            .iter()
            .map(|(name, doc)| {
                (
                    name.to_string(),
                    TableUpdateJob {
                        table_name: name.to_string(),
                        update_query: doc.update_query.clone(),
                        columns: doc.columns.clone(),
                        primary_key: doc.primary_key.clone(),
                    },
                )
            })
            .collect();

        let views: Vec<String> = load_or_empty(store, Collection::MaterializedViews).await;
        let mut deduped = Vec::with_capacity(views.len());
        for view in views {
            if !deduped.contains(&view) {
                deduped.push(view);
            }
        }
        self.views = deduped;

        let alerts: OrderedMap<AlertDocument> = load_or_empty(store, Collection::Alerts).await;
        self.alerts = alerts
            .iter()
            .map(|(name, doc)| {
                (
                    name.to_string(),
                    AlertDefinition {
                        name: name.to_string(),
                        predicate_query: doc.alert_sql.clone(),
                        metadata: doc.metadata.clone(),
                    },
                )
            })
            .collect();
    }

    pub fn store(&self) -> Arc<dyn RegistryStore> {
        Arc::clone(&self.store)
    }

    /// Register (or overwrite) a table update job and persist it.
    ///
    /// The cache only changes once the store has accepted the new document.
    pub async fn register_table_update(&mut self, job: TableUpdateJob) -> Result<()> {
        job.validate()?;

        let name = job.table_name.clone();
        let mut jobs = self.table_jobs.clone();
        let replaced = jobs.insert(name.clone(), job).is_some();
        self.save_table_jobs(&jobs).await?;
        self.table_jobs = jobs;

        if replaced {
            info!(table = %name, "Table update job re-registered");
        } else {
            info!(table = %name, "Table update job registered");
        }
        Ok(())
    }

    /// Register a materialized view. Returns `false` when it was already known.
    pub async fn register_materialized_view(&mut self, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(RegistryError::invalid(name, "view name is empty"));
        }
        if self.views.iter().any(|v| v == name) {
            return Ok(false);
        }

        let mut views = self.views.clone();
        views.push(name.to_string());
        let data = serde_json::to_value(&views)?;
        self.store.save(Collection::MaterializedViews, &data).await?;
        self.views = views;

        info!(view = %name, "Materialized view registered");
        Ok(true)
    }

    /// Register (or overwrite) an alert definition and persist it.
    ///
    /// The cache only changes once the store has accepted the new document.
    pub async fn register_alert(&mut self, alert: AlertDefinition) -> Result<()> {
        alert.validate()?;

        let name = alert.name.clone();
        let mut alerts = self.alerts.clone();
        let replaced = alerts.insert(name.clone(), alert).is_some();
        self.save_alerts(&alerts).await?;
        self.alerts = alerts;

        if replaced {
            info!(alert = %name, "Alert already exists, updated existing alert");
        } else {
            info!(alert = %name, "Alert registered");
        }
        Ok(())
    }

    async fn save_table_jobs(&self, jobs: &OrderedMap<TableUpdateJob>) -> Result<()> {
        let docs: OrderedMap<TableJobDocument> = jobs
            .iter()
            .map(|(name, job)| {
                (
                    name.to_string(),
                    TableJobDocument {
                        update_query: job.update_query.clone(),
                        columns: job.columns.clone(),
                        primary_key: job.primary_key.clone(),
                    },
                )
            })
            .collect();
        let data = serde_json::to_value(&docs)?;
        self.store.save(Collection::TableJobs, &data).await
    }

    async fn save_alerts(&self, alerts: &OrderedMap<AlertDefinition>) -> Result<()> {
        let docs: OrderedMap<AlertDocument> = alerts
            .iter()
            .map(|(name, alert)| {
                (
                    name.to_string(),
                    AlertDocument {
                        alert_sql: alert.predicate_query.clone(),
                        metadata: alert.metadata.clone(),
                    },
                )
            })
            .collect();
        let data = serde_json::to_value(&docs)?;
        self.store.save(Collection::Alerts, &data).await
    }

    /// Table jobs in registration order.
    pub fn table_jobs(&self) -> impl Iterator<Item = &TableUpdateJob> {
        self.table_jobs.values()
    }

    pub fn table_job(&self, table_name: &str) -> Option<&TableUpdateJob> {
        self.table_jobs.get(table_name)
    }

    /// View names in registration order.
    pub fn materialized_views(&self) -> &[String] {
        &self.views
    }

    /// Alerts in registration order.
    pub fn alerts(&self) -> impl Iterator<Item = &AlertDefinition> {
        self.alerts.values()
    }

    pub fn alert(&self, name: &str) -> Option<&AlertDefinition> {
        self.alerts.get(name)
    }
}
