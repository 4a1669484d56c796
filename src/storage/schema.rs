//! Bookkeeping schema for emulated materialized views, using sea-query.

use sea_query::Iden;

/// Materialized view definitions table schema.
#[derive(Iden)]
pub enum MaterializedViews {
    #[iden = "govsync_materialized_views"]
    Table,
    #[iden = "name"]
    Name,
    #[iden = "definition"]
    Definition,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "refreshed_at"]
    RefreshedAt,
}

/// SQL for creating the materialized view bookkeeping table.
pub const CREATE_MATERIALIZED_VIEWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS govsync_materialized_views (
    name TEXT PRIMARY KEY,
    definition TEXT NOT NULL,
    created_at TEXT NOT NULL,
    refreshed_at TEXT
);
"#;
