//! Chart-ready datasets written by alert workers.
//!
//! Rendering is left to downstream tooling; each follow-up query's rows are
//! written as one JSON document carrying the chart hints from the alert's
//! registration.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::debug;

use super::Result;
use crate::registry::AdditionalQuery;
use crate::Row;

/// One follow-up query's data plus its chart hints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartDataset {
    pub alert_name: String,
    /// `query1`, `query2`, ... in registration order.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_type: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ChartDataset {
    /// Build a dataset, keeping only `output_columns` when any are declared.
    pub fn new(alert_name: &str, label: &str, query: &AdditionalQuery, rows: Vec<Row>) -> Self {
        let (columns, rows) = if query.output_columns.is_empty() {
            let columns = rows
                .first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default();
            (columns, rows)
        } else {
            let rows = rows
                .into_iter()
                .map(|row| project(row, &query.output_columns))
                .collect();
            (query.output_columns.clone(), rows)
        };

        Self {
            alert_name: alert_name.to_string(),
            label: label.to_string(),
            title: query.title.clone(),
            graph_type: query.graph_type.clone(),
            columns,
            rows,
        }
    }
}

/// Keep the named columns in the given order. Missing columns become null.
fn project(mut row: Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|column| {
            let key = row
                .keys()
                .find(|key| key.as_str() == column)
                .or_else(|| row.keys().find(|key| key.eq_ignore_ascii_case(column)))
                .cloned();
            let value = key.and_then(|key| row.remove(&key)).unwrap_or_default();
            (column.clone(), value)
        })
        .collect()
}

/// Writes datasets under an output directory.
#[derive(Debug, Clone)]
pub struct ChartWriter {
    output_dir: PathBuf,
}

impl ChartWriter {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, dataset: &ChartDataset) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.json", dataset.alert_name, dataset.label))
    }

    /// Write a dataset atomically and return its path.
    pub async fn write(&self, dataset: &ChartDataset) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).await?;

        let path = self.path_for(dataset);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(dataset)?).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(path = %path.display(), rows = dataset.rows.len(), "Chart dataset written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn rows() -> Vec<Row> {
        vec![
            json!({"day": "2024-05-01", "For": 10, "against": 2}),
            json!({"day": "2024-05-02", "For": 14, "against": 5}),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect()
    }

    #[test]
    fn test_dataset_defaults_to_all_columns() {
        let dataset = ChartDataset::new("quorum", "query1", &AdditionalQuery::sql("SELECT 1"), rows());
        assert_eq!(dataset.columns, ["day", "For", "against"]);
        assert_eq!(dataset.rows.len(), 2);
    }

    #[test]
    fn test_dataset_projects_output_columns() {
        let query = AdditionalQuery {
            query_text: "SELECT 1".to_string(),
            graph_type: Some("line".to_string()),
            output_columns: vec!["day".to_string(), "for".to_string(), "abstain".to_string()],
            title: Some("Votes per day".to_string()),
        };
        let dataset = ChartDataset::new("quorum", "query1", &query, rows());

        assert_eq!(dataset.columns, ["day", "for", "abstain"]);
        let keys: Vec<_> = dataset.rows[0].keys().cloned().collect();
        assert_eq!(keys, ["day", "for", "abstain"]);
        assert_eq!(dataset.rows[1]["for"], json!(14));
        assert_eq!(dataset.rows[1]["abstain"], Value::Null);
    }

    #[tokio::test]
    async fn test_writer_creates_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ChartWriter::new(dir.path().join("graphs"));
        let dataset = ChartDataset::new("quorum", "query2", &AdditionalQuery::sql("SELECT 1"), rows());

        let path = writer.write(&dataset).await.unwrap();

        assert_eq!(path, dir.path().join("graphs").join("quorum_query2.json"));
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["label"], json!("query2"));
        assert_eq!(written["rows"][0]["For"], json!(10));
    }
}
