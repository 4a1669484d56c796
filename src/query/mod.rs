//! Analytical query service access.
//!
//! The core only depends on the submit / page contract of [`QueryService`].
//! [`PaginatedQueryClient`] drives a submitted query through every result
//! page, re-reading the service-reported page count on each iteration since
//! the first pages may only carry a provisional total.

mod flipside;
pub mod mock;

pub use flipside::FlipsideClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::Row;

/// Result type for query service operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors that can occur talking to the analytical query service.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: HTTP {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Query {query_id} ended in state {state}: {message}")]
    QueryFailed {
        query_id: String,
        state: String,
        message: String,
    },

    #[error("Query {query_id} did not finish within {waited:?}")]
    Timeout { query_id: String, waited: Duration },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Handle to a submitted query whose results can be paged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHandle {
    pub id: String,
}

impl QueryHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Paging metadata reported by the service with every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageInfo {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_rows: Option<u64>,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    pub records: Vec<Row>,
    pub page: PageInfo,
}

/// Contract of the external analytical query service.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Submit a query and wait until its results can be paged.
    async fn submit(&self, query_text: &str) -> Result<QueryHandle>;

    /// Fetch one page (1-based) of a submitted query's results.
    async fn get_page(
        &self,
        handle: &QueryHandle,
        page_number: u32,
        page_size: u32,
    ) -> Result<ResultPage>;
}

/// Runs a query to completion, accumulating every page of rows.
#[derive(Clone)]
pub struct PaginatedQueryClient {
    service: Arc<dyn QueryService>,
    page_size: u32,
}

impl PaginatedQueryClient {
    pub fn new(service: Arc<dyn QueryService>) -> Self {
        Self {
            service,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Submit `query_text` and collect all result rows.
    ///
    /// Paging stops once the current page index exceeds the total page count
    /// reported by the most recent page. Any error aborts the whole fetch.
    pub async fn run_query(&self, query_text: &str) -> Result<Vec<Row>> {
        let handle = self.service.submit(query_text).await?;
        debug!(query_id = %handle.id, "Query submitted");

        let mut rows = Vec::new();
        let mut current_page = 1u32;

        loop {
            let page = self
                .service
                .get_page(&handle, current_page, self.page_size)
                .await?;
            let total_pages = page.page.total_pages;

            debug!(
                query_id = %handle.id,
                page = current_page,
                total_pages,
                records = page.records.len(),
                "Fetched result page"
            );

            rows.extend(page.records);
            current_page += 1;

            if current_page > total_pages {
                break;
            }
        }

        info!(query_id = %handle.id, rows = rows.len(), pages = current_page - 1, "Query results collected");
        Ok(rows)
    }
}
