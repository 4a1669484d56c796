//! Fire-once alert ledger.
//!
//! Records which alerts fired while their predicate has stayed true. An entry
//! is released the first time its predicate evaluates false, re-arming the
//! alert. Persistence failures are logged; the in-memory state stays
//! authoritative for the running process.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::store::{Collection, RegistryStore};
use super::{load_or_empty, OrderedMap};

/// Latched alerts and the time each one fired.
pub struct AlertLedger {
    store: Arc<dyn RegistryStore>,
    entries: OrderedMap<DateTime<Utc>>,
}

impl AlertLedger {
    pub async fn open(store: Arc<dyn RegistryStore>) -> Self {
        let entries = load_or_empty(store.as_ref(), Collection::AlertLedger).await;
        Self { store, entries }
    }

    pub fn is_latched(&self, alert_name: &str) -> bool {
        self.entries.contains_key(alert_name)
    }

    pub fn latched_at(&self, alert_name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(alert_name).copied()
    }

    /// Record that an alert fired.
    pub async fn latch(&mut self, alert_name: &str, at: DateTime<Utc>) {
        self.entries.insert(alert_name.to_string(), at);
        debug!(alert = %alert_name, "Alert latched");
        self.persist().await;
    }

    /// Re-arm an alert. No-op when it was not latched.
    pub async fn release(&mut self, alert_name: &str) {
        if self.entries.shift_remove(alert_name).is_some() {
            debug!(alert = %alert_name, "Alert re-armed");
            self.persist().await;
        }
    }

    /// Drop entries for alerts that are no longer registered.
    pub async fn retain_known<'a>(&mut self, known: impl IntoIterator<Item = &'a str>) {
        let known: HashSet<&str> = known.into_iter().collect();
        let before = self.entries.len();
        self.entries.retain(|name, _| known.contains(name.as_str()));

        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!(pruned, "Pruned ledger entries for removed alerts");
            self.persist().await;
        }
    }

    async fn persist(&self) {
        let data = match serde_json::to_value(&self.entries) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Failed to encode alert ledger");
                return;
            }
        };
        if let Err(e) = self.store.save(Collection::AlertLedger, &data).await {
            warn!(error = %e, "Failed to persist alert ledger");
        }
    }
}
