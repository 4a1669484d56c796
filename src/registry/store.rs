//! Registry persistence interface.

use async_trait::async_trait;
use serde_json::Value;

use super::Result;

/// Independently persisted registry collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Table update jobs keyed by table name.
    TableJobs,
    /// Materialized view names.
    MaterializedViews,
    /// Alert definitions keyed by alert name.
    Alerts,
    /// Fire-once ledger: alert name to the time it latched.
    AlertLedger,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::TableJobs,
        Collection::MaterializedViews,
        Collection::Alerts,
        Collection::AlertLedger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::TableJobs => "table_jobs",
            Collection::MaterializedViews => "materialized_views",
            Collection::Alerts => "alerts",
            Collection::AlertLedger => "alert_ledger",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable storage for registry collections.
///
/// Implementations:
/// - `FilesystemRegistryStore`: one JSON document per collection
/// - `MemoryRegistryStore`: in-memory, for tests
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load a collection's document. `Ok(None)` when it was never saved.
    async fn load(&self, collection: Collection) -> Result<Option<Value>>;

    /// Replace a collection's document.
    async fn save(&self, collection: Collection, data: &Value) -> Result<()>;
}
