//! In-memory query service for testing.
//!
//! Queries are matched by exact text. Each registered query serves its rows
//! in pages of the requested size; reported page totals can be overridden per
//! page to imitate a service whose early totals are provisional.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{PageInfo, QueryError, QueryHandle, QueryService, Result, ResultPage};
use crate::Row;

#[derive(Clone, Default)]
struct MockQuery {
    rows: Vec<Row>,
    /// Reported `total_pages` for pages 1..=n; accurate afterwards.
    provisional_totals: Vec<u32>,
    fail_submit: Option<String>,
    fail_on_page: Option<u32>,
}

/// Mock query service with scripted results and failures.
#[derive(Default)]
pub struct MockQueryService {
    queries: Mutex<HashMap<String, MockQuery>>,
    submissions: Mutex<Vec<String>>,
    page_requests: Mutex<Vec<(String, u32)>>,
}

impl MockQueryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rows` for `query_text`.
    pub fn add_query(&self, query_text: &str, rows: Vec<Row>) {
        self.with_query(query_text, |q| q.rows = rows);
    }

    /// Report these totals on the first pages instead of the real count.
    pub fn set_provisional_totals(&self, query_text: &str, totals: Vec<u32>) {
        self.with_query(query_text, |q| q.provisional_totals = totals);
    }

    /// Make submission of `query_text` fail.
    pub fn fail_submit(&self, query_text: &str, message: &str) {
        let message = message.to_string();
        self.with_query(query_text, |q| q.fail_submit = Some(message));
    }

    /// Make fetching `page` of `query_text` fail.
    pub fn fail_on_page(&self, query_text: &str, page: u32) {
        self.with_query(query_text, |q| q.fail_on_page = Some(page));
    }

    /// Query texts submitted so far, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Page numbers requested for a query, in order.
    pub fn pages_requested(&self, query_text: &str) -> Vec<u32> {
        self.page_requests
            .lock()
            .map(|reqs| {
                reqs.iter()
                    .filter(|(q, _)| q == query_text)
                    .map(|(_, p)| *p)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn with_query(&self, query_text: &str, f: impl FnOnce(&mut MockQuery)) {
        if let Ok(mut queries) = self.queries.lock() {
            f(queries.entry(query_text.to_string()).or_default());
        }
    }

    fn lookup(&self, query_text: &str) -> Option<MockQuery> {
        self.queries
            .lock()
            .ok()
            .and_then(|q| q.get(query_text).cloned())
    }
}

#[async_trait]
impl QueryService for MockQueryService {
    async fn submit(&self, query_text: &str) -> Result<QueryHandle> {
        if let Ok(mut subs) = self.submissions.lock() {
            subs.push(query_text.to_string());
        }
        let query = self
            .lookup(query_text)
            .ok_or_else(|| QueryError::Rpc {
                code: -32602,
                message: format!("unknown query: {}", query_text),
            })?;
        if let Some(message) = query.fail_submit {
            return Err(QueryError::Unavailable(message));
        }
        // The query text doubles as the handle id
        Ok(QueryHandle::new(query_text))
    }

    async fn get_page(
        &self,
        handle: &QueryHandle,
        page_number: u32,
        page_size: u32,
    ) -> Result<ResultPage> {
        if let Ok(mut reqs) = self.page_requests.lock() {
            reqs.push((handle.id.clone(), page_number));
        }
        let query = self
            .lookup(&handle.id)
            .ok_or_else(|| QueryError::Malformed(format!("unknown handle {}", handle.id)))?;
        if query.fail_on_page == Some(page_number) {
            return Err(QueryError::Unavailable(format!(
                "page {} unavailable",
                page_number
            )));
        }

        let size = page_size.max(1) as usize;
        let actual_total = query.rows.len().div_ceil(size) as u32;
        let total_pages = query
            .provisional_totals
            .get(page_number.saturating_sub(1) as usize)
            .copied()
            .unwrap_or(actual_total);

        let start = (page_number.saturating_sub(1) as usize).saturating_mul(size);
        let records = query.rows.iter().skip(start).take(size).cloned().collect();

        Ok(ResultPage {
            records,
            page: PageInfo {
                current_page: page_number,
                total_pages,
                total_rows: Some(query.rows.len() as u64),
            },
        })
    }
}
