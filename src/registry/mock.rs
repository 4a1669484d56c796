//! In-memory registry store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::store::{Collection, RegistryStore};
use super::{RegistryError, Result};

/// Registry store that keeps documents in memory.
#[derive(Default)]
pub struct MemoryRegistryStore {
    documents: RwLock<HashMap<Collection, Value>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document, bypassing validation.
    pub async fn put_raw(&self, collection: Collection, data: Value) {
        self.documents.write().await.insert(collection, data);
    }

    pub async fn get_raw(&self, collection: Collection) -> Option<Value> {
        self.documents.read().await.get(&collection).cloned()
    }

    /// Make every subsequent load fail, as an unreadable backing file would.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent save fail, as a read-only backing directory would.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self, collection: Collection) -> Result<Option<Value>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(RegistryError::Io(std::io::Error::other(format!(
                "simulated read failure for {}",
                collection
            ))));
        }
        Ok(self.documents.read().await.get(&collection).cloned())
    }

    async fn save(&self, collection: Collection, data: &Value) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RegistryError::Io(std::io::Error::other(format!(
                "simulated write failure for {}",
                collection
            ))));
        }
        self.documents.write().await.insert(collection, data.clone());
        Ok(())
    }
}
