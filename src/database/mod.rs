//! PostgreSQL access via DuckDB
//!
//! This module provides the production driver: a `QueryExecutor` and
//! `CatalogProbe` backed by DuckDB's postgres extension.

mod engine;

pub use engine::DatabaseEngine;
