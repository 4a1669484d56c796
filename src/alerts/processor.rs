//! The alert worker body.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    publisher_from_config, AlertHandler, AlertReport, AnthropicSummarizer, ChartDataset,
    ChartWriter, Publisher, Result, Summarizer, TriggeredAlert,
};
use crate::config::AlertsConfig;
use crate::registry::AdditionalQuery;
use crate::storage::RelationalStore;
use crate::Row;

/// Rows of one successful follow-up query.
struct QueryResult<'a> {
    label: String,
    query: &'a AdditionalQuery,
    rows: Vec<Row>,
}

/// Runs follow-up queries, writes chart datasets, asks for an AI summary,
/// and publishes the result.
pub struct AlertProcessor {
    store: Arc<dyn RelationalStore>,
    charts: ChartWriter,
    summarizer: Option<Arc<dyn Summarizer>>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl AlertProcessor {
    pub fn new(store: Arc<dyn RelationalStore>, charts: ChartWriter) -> Self {
        Self {
            store,
            charts,
            summarizer: None,
            publisher: None,
        }
    }

    /// Wire summarizer and publisher from configuration.
    pub fn from_config(config: &AlertsConfig, store: Arc<dyn RelationalStore>) -> Result<Self> {
        let mut processor = Self::new(store, ChartWriter::new(&config.output_dir));
        if let Some(summarizer) = AnthropicSummarizer::from_config(&config.ai)? {
            processor = processor.with_summarizer(Arc::new(summarizer));
        }
        if let Some(publisher) = publisher_from_config(&config.publish)? {
            processor = processor.with_publisher(publisher);
        }
        Ok(processor)
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Process one alert. Returns `None` when no follow-up query produced data.
    pub async fn process(&self, alert: &TriggeredAlert) -> Result<Option<AlertReport>> {
        info!(alert = %alert.alert_name, "Processing alert");

        let results = self.run_queries(alert).await;
        if results.is_empty() {
            info!(alert = %alert.alert_name, "No data returned, skipping alert");
            return Ok(None);
        }

        let mut datasets = Vec::with_capacity(results.len());
        for result in &results {
            let dataset = ChartDataset::new(
                &alert.alert_name,
                &result.label,
                result.query,
                result.rows.clone(),
            );
            match self.charts.write(&dataset).await {
                Ok(path) => datasets.push(path),
                Err(e) => warn!(
                    alert = %alert.alert_name,
                    label = %result.label,
                    error = %e,
                    "Failed to write chart dataset"
                ),
            }
        }

        let data = format_results(&results);
        let analysis = match non_empty(&alert.metadata.ai_prompt_info) {
            Some(prompt) => {
                self.summarize(alert, &format!("{}\n\nRelevant Data:\n{}", prompt, data))
                    .await
            }
            None => None,
        };
        let post = match non_empty(&alert.metadata.twitter_prompt_info) {
            Some(prompt) => {
                let prompt = match &analysis {
                    Some(analysis) => format!("{}\n\nAnalysis:\n{}", prompt, analysis),
                    None => format!("{}\n\nRelevant Data:\n{}", prompt, data),
                };
                self.summarize(alert, &prompt).await
            }
            None => None,
        };

        let report = AlertReport {
            alert_name: alert.alert_name.clone(),
            fired_at: alert.fired_at,
            datasets,
            analysis,
            post,
        };

        if let Some(publisher) = &self.publisher {
            publisher.publish(&report).await?;
            info!(alert = %alert.alert_name, publisher = publisher.name(), "Alert report published");
        }

        Ok(Some(report))
    }

    /// Run every follow-up query, labelled `query1..N` by position.
    /// Failed queries are logged and left out.
    async fn run_queries<'a>(&self, alert: &'a TriggeredAlert) -> Vec<QueryResult<'a>> {
        let mut results = Vec::new();
        for (idx, query) in alert.metadata.additional_queries.iter().enumerate() {
            let label = format!("query{}", idx + 1);
            match self.store.fetch_rows(&query.query_text).await {
                Ok(rows) => results.push(QueryResult { label, query, rows }),
                Err(e) => warn!(
                    alert = %alert.alert_name,
                    label = %label,
                    error = %e,
                    "Follow-up query failed"
                ),
            }
        }
        results
    }

    async fn summarize(&self, alert: &TriggeredAlert, prompt: &str) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        match summarizer.complete(prompt).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(alert = %alert.alert_name, error = %e, "AI summarization failed");
                None
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// `label:\nrows` blocks, one per query.
fn format_results(results: &[QueryResult<'_>]) -> String {
    results
        .iter()
        .map(|result| {
            let rows = serde_json::to_string(&result.rows).unwrap_or_default();
            format!("{}:\n{}", result.label, rows)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl AlertHandler for AlertProcessor {
    async fn handle(&self, alert: TriggeredAlert) -> Result<()> {
        self.process(&alert).await.map(|_| ())
    }
}
