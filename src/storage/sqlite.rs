//! SQLite relational store.
//!
//! SQLite has no materialized views. A view is emulated as a table populated
//! from its defining query; the query is kept in a bookkeeping table and a
//! refresh deletes and repopulates the table in one transaction.

use std::str::FromStr;

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::schema::{MaterializedViews, CREATE_MATERIALIZED_VIEWS_TABLE};
use super::sql::{create_table_sql, extract_values, insert_sql, row_from_pairs, trim_statement};
use super::{RelationalStore, Result, StorageError, UpsertReport};
use crate::registry::TableUpdateJob;
use crate::Row;

/// SQLite implementation of [`RelationalStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool and create the bookkeeping table.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Open `url`, creating the database file if needed.
    ///
    /// In-memory databases live as long as their connection, so the pool
    /// keeps its connections open indefinitely.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::new(pool).await
    }

    /// Connect to a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_MATERIALIZED_VIEWS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn view_definition(&self, name: &str) -> Result<Option<String>> {
        let query = Query::select()
            .column(MaterializedViews::Definition)
            .from(MaterializedViews::Table)
            .and_where(Expr::col(MaterializedViews::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| row.get("definition")))
    }
}

/// Decode one column by the storage class of its value.
fn decode_value(row: &SqliteRow, idx: usize) -> Result<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_name = raw.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => {
            Value::from(row.try_get_unchecked::<i64, _>(idx)?)
        }
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            Value::from(row.try_get_unchecked::<f64, _>(idx)?)
        }
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let pairs = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| Ok((column.name().to_string(), decode_value(row, idx)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(row_from_pairs(pairs))
}

#[async_trait]
impl RelationalStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create_table(&self, job: &TableUpdateJob) -> Result<()> {
        sqlx::query(&create_table_sql(job))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_rows(&self, job: &TableUpdateJob, rows: &[Row]) -> Result<UpsertReport> {
        let sql = insert_sql(job, |_, _| "?".to_string());
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
                query = match value {
                    Value::Null => query.bind(None::<String>),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => query.bind(i),
                        None => query.bind(n.as_f64()),
                    },
                    Value::String(s) => query.bind(s.clone()),
                    other => query.bind(other.to_string()),
                };
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
        let definition = trim_statement(query_text);
        let now = chrono::Utc::now().to_rfc3339();

        let record = Query::insert()
            .into_table(MaterializedViews::Table)
            .columns([
                MaterializedViews::Name,
                MaterializedViews::Definition,
                MaterializedViews::CreatedAt,
                MaterializedViews::RefreshedAt,
            ])
            .values_panic([
                name.into(),
                definition.into(),
                now.clone().into(),
                now.into(),
            ])
            .on_conflict(
                OnConflict::column(MaterializedViews::Name)
                    .update_columns([MaterializedViews::Definition, MaterializedViews::RefreshedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("CREATE TABLE {} AS {}", name, definition))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&record).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
        let definition = self
            .view_definition(name)
            .await?
            .ok_or_else(|| StorageError::UnknownView(name.to_string()))?;

        let touch = Query::update()
            .table(MaterializedViews::Table)
            .value(MaterializedViews::RefreshedAt, chrono::Utc::now().to_rfc3339())
            .and_where(Expr::col(MaterializedViews::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {}", name))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("INSERT INTO {} {}", name, definition))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&touch).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn evaluate_predicate(&self, query_text: &str) -> Result<Option<Value>> {
        let row = sqlx::query(trim_statement(query_text))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) if !row.columns().is_empty() => Ok(Some(decode_value(&row, 0)?)),
            _ => Ok(None),
        }
    }

    async fn fetch_rows(&self, query_text: &str) -> Result<Vec<Row>> {
        let rows = sqlx::query(trim_statement(query_text))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }
}
