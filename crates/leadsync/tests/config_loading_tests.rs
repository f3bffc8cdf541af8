//! Loading configuration from disk and building an engine from it.

mod common;

use std::fs;

use leadsync::{load_config, SyncEngine, SyncError};
use serial_test::serial;
use tempfile::TempDir;

use common::OWNER;

const CONFIG: &str = r#"{
    "pollIntervalSecs": 3,
    "timeoutSweepIntervalSecs": 20,
    "processingDeadlineSecs": 600,
    "pendingDeadlineSecs": 300,
    "trigger": {
        "url": "http://127.0.0.1:9/webhook/scrape",
        "tokenEnvVar": "LEADSYNC_TEST_TRIGGER_TOKEN"
    },
    "logging": { "json": true }
}"#;

#[tokio::test]
#[serial]
async fn test_engine_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leadsync.json");
    fs::write(&path, CONFIG).unwrap();
    std::env::set_var("LEADSYNC_TEST_TRIGGER_TOKEN", "session-token");

    let config = load_config(&path).unwrap();
    assert_eq!(config.poll_interval_secs, 3);
    assert_eq!(config.pending_deadline_secs, Some(300));
    assert!(config.logging.json);

    let db_path = dir.path().join("data").join("leadsync.db");
    let engine = SyncEngine::with_sqlite(config, Some(&db_path)).unwrap();
    assert!(db_path.exists());

    engine.start(OWNER).await.unwrap();
    assert_eq!(engine.owner_id().await.as_deref(), Some(OWNER));
    engine.shutdown().await;

    std::env::remove_var("LEADSYNC_TEST_TRIGGER_TOKEN");
}

#[test]
#[serial]
fn test_missing_token_source_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leadsync.json");
    fs::write(&path, CONFIG).unwrap();
    std::env::remove_var("LEADSYNC_TEST_TRIGGER_TOKEN");

    let config = load_config(&path).unwrap();
    let result = SyncEngine::with_sqlite(config, None);
    assert!(matches!(result, Err(SyncError::Secret(_))));
}

#[test]
fn test_engine_without_trigger_is_rejected() {
    let config = leadsync::load_config_from_str("{}").unwrap();
    let result = SyncEngine::with_sqlite(config, None);
    assert!(matches!(result, Err(SyncError::Config(_))));
}

#[test]
fn test_invalid_intervals_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("leadsync.json");
    fs::write(
        &path,
        r#"{ "pollIntervalSecs": 60, "timeoutSweepIntervalSecs": 30 }"#,
    )
    .unwrap();

    assert!(load_config(&path).is_err());
}
