//! Triggered alerts and the side-effect pipeline run for each of them.
//!
//! A [`TriggeredAlert`] is produced by the evaluator and handed to an
//! [`AlertHandler`] inside an isolated worker. The standard handler is
//! [`AlertProcessor`]: follow-up queries, chart datasets, an optional AI
//! summary, and publishing.

mod charts;
mod processor;
mod publisher;
mod summarizer;

pub use charts::{ChartDataset, ChartWriter};
pub use processor::AlertProcessor;
pub use publisher::{publisher_from_config, LogPublisher, Publisher, WebhookPublisher};
pub use summarizer::{AnthropicSummarizer, Summarizer};

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{AlertDefinition, AlertMetadata};
use crate::storage::StorageError;

/// Result type for alert processing.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors that can occur while processing a triggered alert.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// An alert whose predicate held in the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub alert_name: String,
    pub metadata: AlertMetadata,
    pub fired_at: DateTime<Utc>,
}

impl TriggeredAlert {
    pub fn new(definition: &AlertDefinition, fired_at: DateTime<Utc>) -> Self {
        Self {
            alert_name: definition.name.clone(),
            metadata: definition.metadata.clone(),
            fired_at,
        }
    }

    /// The `{alert_name: metadata}` record handed to downstream consumers.
    pub fn record(&self) -> Result<Value> {
        let mut record = serde_json::Map::new();
        record.insert(self.alert_name.clone(), serde_json::to_value(&self.metadata)?);
        Ok(Value::Object(record))
    }

    /// Encode for the worker environment.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the worker environment.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What an alert worker produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertReport {
    pub alert_name: String,
    pub fired_at: DateTime<Utc>,
    /// Chart dataset files written, one per follow-up query with data.
    pub datasets: Vec<PathBuf>,
    /// AI analysis of the follow-up data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// Social post text derived from the analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

/// Runs the side-effect pipeline for one triggered alert.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, alert: TriggeredAlert) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AdditionalQuery;
    use serde_json::json;

    fn alert() -> TriggeredAlert {
        let metadata = AlertMetadata {
            ai_prompt_info: Some("Summarize the vote".to_string()),
            twitter_prompt_info: None,
            additional_queries: vec![AdditionalQuery::sql("SELECT 1")],
        };
        let definition = AlertDefinition::new("quorum_reached", "SELECT true", metadata);
        TriggeredAlert::new(&definition, Utc::now())
    }

    #[test]
    fn test_record_is_keyed_by_alert_name() {
        let record = alert().record().unwrap();
        assert_eq!(
            record["quorum_reached"]["ai_prompt_info"],
            json!("Summarize the vote")
        );
        assert_eq!(
            record["quorum_reached"]["additional_queries"][0]["query_text"],
            json!("SELECT 1")
        );
    }

    #[test]
    fn test_worker_encoding_round_trip() {
        let alert = alert();
        let decoded = TriggeredAlert::from_json(&alert.to_json().unwrap()).unwrap();
        assert_eq!(decoded, alert);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            TriggeredAlert::from_json("{not json"),
            Err(AlertError::Json(_))
        ));
    }
}
