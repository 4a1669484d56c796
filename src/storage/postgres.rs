//! PostgreSQL relational store.
//!
//! Parameters are bound as text and cast to each column's declared type, so
//! any warehouse value that PostgreSQL can parse lands in the right type.
//! Reads go through `row_to_json` and come back as `[name, value]` pairs in
//! select order, so repeated column names survive until the row is built.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::sql::{
    create_table_sql, extract_values, insert_sql, row_from_pairs, trim_statement, value_as_text,
};
use super::{RelationalStore, Result, StorageError, UpsertReport};
use crate::registry::TableUpdateJob;
use crate::Row;

/// PostgreSQL implementation of [`RelationalStore`].
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn column_pairs(&self, query_text: &str) -> Result<Vec<Vec<(String, Value)>>> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(&pairs_sql(query_text))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(json,)| parse_pairs(json.as_deref())).collect()
    }
}

/// Wrap a query so each result row is one JSON array of `[name, value]`
/// pairs. The `json` type keeps repeated keys that `jsonb` would merge.
fn pairs_sql(query_text: &str) -> String {
    format!(
        "SELECT (SELECT json_agg(json_build_array(e.key, e.value) ORDER BY e.n) \
         FROM json_each(row_to_json(q)) WITH ORDINALITY AS e(key, value, n))::text \
         FROM ({}) q",
        trim_statement(query_text)
    )
}

/// Decode one row of pairs. A row without columns aggregates to NULL.
fn parse_pairs(json: Option<&str>) -> Result<Vec<(String, Value)>> {
    let Some(json) = json else {
        return Ok(Vec::new());
    };
    let items = match serde_json::from_str(json) {
        Ok(Value::Array(items)) => items,
        Ok(other) => return Err(StorageError::Malformed(format!("expected array, got {}", other))),
        Err(e) => return Err(StorageError::Malformed(e.to_string())),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or_default();
                match pair.pop() {
                    Some(Value::String(name)) => Ok((name, value)),
                    other => Err(StorageError::Malformed(format!(
                        "expected column name, got {:?}",
                        other
                    ))),
                }
            }
            other => Err(StorageError::Malformed(format!(
                "expected [name, value] pair, got {}",
                other
            ))),
        })
        .collect()
}

#[async_trait]
impl RelationalStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn create_table(&self, job: &TableUpdateJob) -> Result<()> {
        sqlx::query(&create_table_sql(job))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_rows(&self, job: &TableUpdateJob, rows: &[Row]) -> Result<UpsertReport> {
        let sql = insert_sql(job, |idx, ty| format!("CAST(${} AS {})", idx, ty));
        let mut report = UpsertReport::default();
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let values = match extract_values(job, row) {
                Ok(values) => values,
                Err(column) => {
                    warn!(table = %job.table_name, column = %column, "Row missing declared column, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            let mut query = sqlx::query(&sql);
            for value in values {
                query = query.bind(value_as_text(value));
            }

            let result = query.execute(&mut *tx).await?;
            if result.rows_affected() > 0 {
                report.inserted += 1;
            } else {
                report.ignored += 1;
            }
        }

        tx.commit().await?;
        debug!(table = %job.table_name, ?report, "Upsert committed");
        Ok(report)
    }

    async fn create_materialized_view(&self, name: &str, query_text: &str) -> Result<()> {
        let sql = format!(
            "CREATE MATERIALIZED VIEW {} AS {} WITH DATA",
            name,
            trim_statement(query_text)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("REFRESH MATERIALIZED VIEW {}", name))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn evaluate_predicate(&self, query_text: &str) -> Result<Option<Value>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(&pairs_sql(query_text))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((json,)) => Ok(parse_pairs(json.as_deref())?
                .into_iter()
                .next()
                .map(|(_, v)| v)),
            None => Ok(None),
        }
    }

    async fn fetch_rows(&self, query_text: &str) -> Result<Vec<Row>> {
        Ok(self
            .column_pairs(query_text)
            .await?
            .into_iter()
            .map(row_from_pairs)
            .collect())
    }
}
