//! Cycle services: table updates, alert evaluation, and the scheduler that
//! drives them.

mod alert_evaluator;
mod cycle;
mod scheduler;
mod update_executor;

pub use alert_evaluator::{AlertEvaluator, Evaluation};
pub use cycle::{CycleKind, CycleReport, UpdateCycle};
pub use scheduler::{Schedule, Scheduler};
pub use update_executor::{JobOutcome, JobReport, UpdateExecutor, UpdateReport, ViewReport};

use crate::alerts::AlertError;
use crate::dispatch::DispatchError;
use crate::query::QueryError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Errors raised while wiring or scheduling cycles.
///
/// A running cycle never fails as a whole; per-job and per-alert failures
/// are reported in its [`CycleReport`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Query service error: {0}")]
    Query(#[from] QueryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Invalid schedule: {0}")]
    Schedule(String),
}
