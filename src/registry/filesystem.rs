//! Filesystem-backed registry store.
//!
//! Each collection is a pretty-printed JSON document:
//! ```text
//! {dir}/
//!   update_registry.json      table jobs
//!   materialized_views.json   view names
//!   alerts.json               alert definitions
//!   triggered_alerts.json     fire-once ledger
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{Collection, RegistryStore};
use super::Result;
use crate::config::RegistryConfig;

/// Registry store writing one JSON file per collection.
pub struct FilesystemRegistryStore {
    config: RegistryConfig,
}

impl FilesystemRegistryStore {
    /// Create a store rooted at `config.dir`, creating the directory if needed.
    pub async fn new(config: RegistryConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir).await?;
        Ok(Self { config })
    }

    /// Create a store using default file names under `dir`.
    pub async fn in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let config = RegistryConfig {
            dir: dir.as_ref().to_path_buf(),
            ..RegistryConfig::default()
        };
        Self::new(config).await
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.config.path_for(collection)
    }

    /// Keep a copy of an unparseable document before it gets overwritten.
    async fn preserve_if_corrupt(&self, path: &Path) {
        let Ok(bytes) = fs::read(path).await else {
            return;
        };
        if serde_json::from_slice::<Value>(&bytes).is_ok() {
            return;
        }

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let backup = path.with_extension(format!("json.corrupt-{}", stamp));
        match fs::write(&backup, &bytes).await {
            Ok(()) => warn!(
                path = %path.display(),
                backup = %backup.display(),
                "Registry file was malformed; kept a copy before overwriting"
            ),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to back up malformed registry file"
            ),
        }
    }
}

#[async_trait]
impl RegistryStore for FilesystemRegistryStore {
    async fn load(&self, collection: Collection) -> Result<Option<Value>> {
        let path = self.path_for(collection);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(collection = %collection, path = %path.display(), "Registry file not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let value = serde_json::from_slice(&bytes)?;
        Ok(Some(value))
    }

    async fn save(&self, collection: Collection, data: &Value) -> Result<()> {
        let path = self.path_for(collection);
        self.preserve_if_corrupt(&path).await;

        // Write atomically using temp file + rename. The daemon and the admin
        // CLI may save concurrently, so each writer gets its own temp file.
        let bytes = serde_json::to_vec_pretty(data)?;
        let temp_path = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(collection = %collection, path = %path.display(), size = bytes.len(), "Saved registry collection");
        Ok(())
    }
}
