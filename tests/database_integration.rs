//! Database integration tests with real PostgreSQL
//!
//! These tests require a live PostgreSQL database.
//! Set POSTGRES_TEST_URL environment variable to run. POSTGRES_TEST_TABLE
//! (`schema.table`) picks the table to read, defaulting to `pg_catalog.pg_type`.

use pgctid_sync::config::{ConfiguredCatalog, ConfiguredStream, ConnectionConfig, Extraction, SyncConfig};
use pgctid_sync::database::DatabaseEngine;
use pgctid_sync::engine::{CtidSync, Message};
use pgctid_sync::source::CatalogProbe;
use pgctid_sync::state::PersistedStates;
use pgctid_sync::StreamDescriptor;
use std::sync::Arc;

/// Get test connection string from environment or skip
fn get_test_connection() -> Option<String> {
    std::env::var("POSTGRES_TEST_URL").ok()
}

fn test_table() -> StreamDescriptor {
    let name = std::env::var("POSTGRES_TEST_TABLE").unwrap_or_else(|_| "pg_catalog.pg_type".into());
    match name.split_once('.') {
        Some((namespace, table)) => StreamDescriptor::new(namespace, table),
        None => StreamDescriptor::new("public", name),
    }
}

fn connect(url: String) -> Arc<DatabaseEngine> {
    let engine = DatabaseEngine::new(&ConnectionConfig::from_url(url));
    assert!(engine.is_ok(), "Failed to create engine: {:?}", engine.err());
    Arc::new(engine.unwrap())
}

#[tokio::test]
async fn test_postgres_connection() {
    let Some(url) = get_test_connection() else {
        println!("Skipping: POSTGRES_TEST_URL not set");
        return;
    };

    let engine = connect(url);
    let check = engine.check_connection().await;
    assert!(check.is_ok(), "Connection check failed: {:?}", check.err());
    assert!(!engine.connection_info().is_empty());
}

#[tokio::test]
async fn test_postgres_catalog_probes() {
    let Some(url) = get_test_connection() else {
        println!("Skipping: POSTGRES_TEST_URL not set");
        return;
    };

    let engine = connect(url);
    let table = test_table();

    let block_size = engine.block_size().await.unwrap();
    assert!(block_size.is_power_of_two());

    let filenode = engine.relation_filenode(&table).await.unwrap();
    assert!(filenode.is_some(), "No filenode for {table}");

    let missing = StreamDescriptor::new("public", "pgctid_sync_does_not_exist");
    assert_eq!(engine.relation_filenode(&missing).await.unwrap(), None);

    let status = engine.xmin_status().await.unwrap();
    assert!(status.xmin_raw_value >= status.xmin_xid_value);
    println!("TID range scans: {}", engine.supports_tid_range_scan().await.unwrap());
}

#[tokio::test]
async fn test_postgres_sequential_and_parallel_agree() {
    let Some(url) = get_test_connection() else {
        println!("Skipping: POSTGRES_TEST_URL not set");
        return;
    };

    let engine = connect(url);
    let table = test_table();
    let catalog = ConfiguredCatalog {
        streams: vec![ConfiguredStream::new(table.clone())],
    };
    let config = SyncConfig::new().with_chunk_size_bytes(16 * 1024);

    let mut sequential = Vec::new();
    let report = CtidSync::new(engine.clone(), engine.clone())
        .with_config(config.clone())
        .read(&catalog, &PersistedStates::empty(), None, &mut sequential)
        .await
        .unwrap();
    assert!(report.is_success(), "Sync failed: {:?}", report.failed_streams);
    println!("Synced {} records from {table}", report.stats.records_synced);

    let spool = tempfile::tempdir().unwrap();
    let mut parallel_config = config.with_extraction(Extraction::Parallel);
    parallel_config.parallel.spool_dir = Some(spool.path().to_path_buf());

    let mut parallel = Vec::new();
    CtidSync::new(engine.clone(), engine)
        .with_config(parallel_config)
        .read(&catalog, &PersistedStates::empty(), None, &mut parallel)
        .await
        .unwrap();

    let count = |messages: &[Message]| messages.iter().filter(|m| m.is_record()).count();
    assert_eq!(count(&sequential), count(&parallel));
    assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
}
