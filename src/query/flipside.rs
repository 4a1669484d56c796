//! JSON-RPC client for the Flipside analytical query service.
//!
//! Queries run asynchronously on the service: `createQueryRun` starts a run,
//! `getQueryRun` is polled until the run settles, and `getQueryRunResults`
//! pages through the results.

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{PageInfo, QueryError, QueryHandle, QueryService, Result, ResultPage};
use crate::config::QueryServiceConfig;
use crate::utils::retry::{is_retryable_status, is_retryable_transport, query_backoff};
use crate::Row;

const STATE_SUCCESS: &str = "QUERY_STATE_SUCCESS";
const STATE_FAILED: &str = "QUERY_STATE_FAILED";
const STATE_CANCELED: &str = "QUERY_STATE_CANCELED";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryRun {
    id: String,
    state: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryRunEnvelope {
    query_run: QueryRun,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsPage {
    #[serde(default)]
    current_page_number: Option<u32>,
    #[serde(default)]
    total_rows: Option<u64>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    #[serde(default)]
    column_names: Vec<String>,
    #[serde(default)]
    rows: Vec<Value>,
    page: Option<ResultsPage>,
}

/// Flipside JSON-RPC query service client.
pub struct FlipsideClient {
    client: Client,
    endpoint: String,
    api_key: String,
    config: QueryServiceConfig,
}

impl FlipsideClient {
    /// Create a client from configuration. An API key is required.
    pub fn new(config: &QueryServiceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| QueryError::Config("query service API key not configured".to_string()))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/json-rpc", config.base_url.trim_end_matches('/')),
            api_key,
            config: config.clone(),
        })
    }

    /// Invoke an RPC method, retrying transient failures with backoff.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = (|| async { self.call_once(method, &params).await })
            .retry(query_backoff())
            .when(|e| {
                matches!(e, QueryError::Http(err) if is_retryable_transport(err))
                    || matches!(e, QueryError::Unavailable(_))
            })
            .notify(|e, delay| {
                warn!(method, error = %e, delay = ?delay, "Query service call failed, retrying");
            })
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    async fn call_once(&self, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": [params],
            "id": 1,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return if is_retryable_status(status) {
                Err(QueryError::Unavailable(format!("HTTP {} - {}", status, body)))
            } else {
                Err(QueryError::Rejected {
                    status: status.as_u16(),
                    body,
                })
            };
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(err) = rpc.error {
            return Err(QueryError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        rpc.result
            .ok_or_else(|| QueryError::Malformed(format!("{} returned no result", method)))
    }

    async fn wait_for_run(&self, mut run: QueryRun) -> Result<QueryRun> {
        let started = Instant::now();
        loop {
            match run.state.as_str() {
                STATE_SUCCESS => return Ok(run),
                STATE_FAILED | STATE_CANCELED => {
                    return Err(QueryError::QueryFailed {
                        query_id: run.id,
                        state: run.state,
                        message: run.error_message.unwrap_or_default(),
                    })
                }
                _ => {}
            }

            let waited = started.elapsed();
            if waited >= self.config.query_timeout() {
                return Err(QueryError::Timeout {
                    query_id: run.id,
                    waited,
                });
            }

            debug!(query_id = %run.id, state = %run.state, "Query still running");
            tokio::time::sleep(self.config.poll_interval()).await;

            let envelope: QueryRunEnvelope = self
                .call("getQueryRun", json!({ "queryRunId": run.id }))
                .await?;
            run = envelope.query_run;
        }
    }
}

/// Turn a result row into a record, zipping positional rows with column names.
fn to_record(row: Value, column_names: &[String]) -> Result<Row> {
    match row {
        Value::Object(map) => Ok(map),
        Value::Array(values) => Ok(column_names.iter().cloned().zip(values).collect()),
        other => Err(QueryError::Malformed(format!(
            "unexpected row shape: {}",
            other
        ))),
    }
}

#[async_trait]
impl QueryService for FlipsideClient {
    async fn submit(&self, query_text: &str) -> Result<QueryHandle> {
        let params = json!({
            "resultTTLHours": self.config.result_ttl_hours,
            "maxAgeMinutes": self.config.max_age_minutes,
            "sql": query_text,
            "tags": { "source": "govsync" },
            "dataSource": self.config.data_source,
            "dataProvider": self.config.data_provider,
        });

        let created: QueryRunEnvelope = self.call("createQueryRun", params).await?;
        let run = self.wait_for_run(created.query_run).await?;
        Ok(QueryHandle::new(run.id))
    }

    async fn get_page(
        &self,
        handle: &QueryHandle,
        page_number: u32,
        page_size: u32,
    ) -> Result<ResultPage> {
        let params = json!({
            "queryRunId": handle.id,
            "format": "json",
            "page": { "number": page_number, "size": page_size },
        });

        let results: QueryResults = self.call("getQueryRunResults", params).await?;
        let page = results.page.ok_or_else(|| {
            QueryError::Malformed("getQueryRunResults returned no page info".to_string())
        })?;

        let records = results
            .rows
            .into_iter()
            .map(|row| to_record(row, &results.column_names))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultPage {
            records,
            page: PageInfo {
                current_page: page.current_page_number.unwrap_or(page_number),
                total_pages: page.total_pages,
                total_rows: page.total_rows,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_api_key() {
        let config = QueryServiceConfig::default();
        assert!(matches!(
            FlipsideClient::new(&config),
            Err(QueryError::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = QueryServiceConfig {
            base_url: "http://localhost:9999/".to_string(),
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        let client = FlipsideClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:9999/json-rpc");
    }

    #[test]
    fn test_positional_rows_zip_with_column_names() {
        let columns = vec!["proposal_id".to_string(), "votes".to_string()];
        let record = to_record(json!(["p-1", 42]), &columns).unwrap();
        let keys: Vec<_> = record.keys().cloned().collect();
        assert_eq!(keys, ["proposal_id", "votes"]);
        assert_eq!(record["votes"], json!(42));
    }

    #[test]
    fn test_scalar_row_is_malformed() {
        assert!(to_record(json!(7), &[]).is_err());
    }
}
