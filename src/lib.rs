//! govsync - governance data update registry and alert engine
//!
//! Keeps a relational database in sync with an analytical query service.
//! Registered tables are refreshed every cycle, materialized views are
//! recomputed after them, and registered alert predicates are evaluated
//! against the result. Alerts that fire are handed to workers, one per CPU
//! core slot, which gather chart data, summarize it, and publish a report.

pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod query;
pub mod registry;
pub mod services;
pub mod storage;
pub mod utils;

/// One result or table row: column name to value, in select order.
pub type Row = serde_json::Map<String, serde_json::Value>;
