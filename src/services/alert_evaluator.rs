//! Alert evaluator: run every registered predicate and collect the alerts
//! that fire.
//!
//! Each predicate is isolated: an error counts as "did not fire" and the
//! remaining alerts are still evaluated. Under [`FirePolicy::Once`] an alert
//! is latched in the ledger once its worker has been started, and stays
//! silent until its predicate evaluates false; an evaluation error leaves the
//! latch as it was.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::alerts::TriggeredAlert;
use crate::config::FirePolicy;
use crate::registry::{AlertLedger, UpdateRegistry};
use crate::storage::{is_truthy, RelationalStore};

/// Result of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Alerts to dispatch, in registration order.
    pub fired: Vec<TriggeredAlert>,
    /// True predicates held back by the fire-once ledger.
    pub suppressed: Vec<String>,
    /// Predicates that evaluated false.
    pub quiet: Vec<String>,
    /// Predicates whose query failed, with the error.
    pub failed: Vec<(String, String)>,
}

/// Evaluates alert predicates against the relational store.
pub struct AlertEvaluator {
    store: Arc<dyn RelationalStore>,
    policy: FirePolicy,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn RelationalStore>, policy: FirePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> FirePolicy {
        self.policy
    }

    pub async fn evaluate(&self, registry: &UpdateRegistry) -> Evaluation {
        let mut ledger = match self.policy {
            FirePolicy::Once => {
                let mut ledger = AlertLedger::open(registry.store()).await;
                ledger
                    .retain_known(registry.alerts().map(|a| a.name.as_str()))
                    .await;
                Some(ledger)
            }
            FirePolicy::EveryCycle => None,
        };
        let mut evaluation = Evaluation::default();

        for alert in registry.alerts() {
            let value = match self.store.evaluate_predicate(&alert.predicate_query).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(alert = %alert.name, error = %e, "Alert predicate failed");
                    evaluation.failed.push((alert.name.clone(), e.to_string()));
                    continue;
                }
            };

            if !is_truthy(value.as_ref()) {
                debug!(alert = %alert.name, "Alert predicate false");
                if let Some(ledger) = ledger.as_mut() {
                    ledger.release(&alert.name).await;
                }
                evaluation.quiet.push(alert.name.clone());
                continue;
            }

            if let Some(ledger) = ledger.as_ref() {
                if ledger.is_latched(&alert.name) {
                    debug!(alert = %alert.name, latched_at = ?ledger.latched_at(&alert.name), "Alert already fired, suppressing");
                    evaluation.suppressed.push(alert.name.clone());
                    continue;
                }
            }

            info!(alert = %alert.name, "Alert fired");
            evaluation.fired.push(TriggeredAlert::new(alert, Utc::now()));
        }

        evaluation
    }

    /// Latch alerts whose workers were started. Alerts left out stay armed
    /// and fire again next cycle.
    pub async fn record_dispatched(
        &self,
        registry: &UpdateRegistry,
        dispatched: &[TriggeredAlert],
    ) {
        if self.policy != FirePolicy::Once || dispatched.is_empty() {
            return;
        }
        let mut ledger = AlertLedger::open(registry.store()).await;
        for alert in dispatched {
            ledger.latch(&alert.alert_name, alert.fired_at).await;
        }
    }
}
