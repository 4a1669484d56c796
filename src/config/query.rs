//! Analytical query service configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default page size when paging through query results.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Connection and paging settings for the analytical query service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryServiceConfig {
    /// Service base URL; the JSON-RPC endpoint is `{base_url}/json-rpc`.
    pub base_url: String,
    /// API key sent as `x-api-key`. Falls back to `FLIPSIDE_API_KEY`.
    pub api_key: Option<String>,
    /// Rows requested per result page.
    pub page_size: u32,
    /// Sleep between query status polls.
    pub poll_interval_ms: u64,
    /// Give up on a submitted query after this long.
    pub query_timeout_secs: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// How long the service keeps results around.
    pub result_ttl_hours: u32,
    /// Reuse cached results younger than this (0 disables caching).
    pub max_age_minutes: u32,
    /// Warehouse data source identifier.
    pub data_source: String,
    /// Warehouse data provider identifier.
    pub data_provider: String,
}

impl Default for QueryServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-v2.flipsidecrypto.xyz".to_string(),
            api_key: None,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval_ms: 1000,
            query_timeout_secs: 600,
            request_timeout_secs: 60,
            result_ttl_hours: 1,
            max_age_minutes: 0,
            data_source: "snowflake-default".to_string(),
            data_provider: "flipside".to_string(),
        }
    }
}

impl QueryServiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
