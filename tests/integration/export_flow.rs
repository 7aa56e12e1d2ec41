//! End-to-end export runs against a scripted source

use crate::support::{credential, fast_config, ScriptedSource};
use pocket_exporter::checkpoint::ExportState;
use pocket_exporter::export::{ExportDriver, ExportStatus};
use pocket_exporter::fetcher::FetchError;
use pocket_exporter::storage::jsonl::{read_records, JsonlScan};
use pocket_exporter::storage::{ExportPaths, RawStore};
use pocket_exporter::ArticleRecord;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[tokio::test]
async fn test_full_export_in_three_pages() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new(7));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 3));

    let report = driver.run().await.unwrap();

    assert_eq!(report.status, ExportStatus::Complete);
    assert!(!report.capped);
    assert_eq!(report.batches, 3);
    assert_eq!(report.state.offset, 7);
    assert_eq!(report.state.total_fetched, 7);
    assert!(report.state.is_complete());

    let offsets: Vec<u64> = source.requests().iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 3, 6]);

    let paths = ExportPaths::under(dir.path());
    let records = read_records(&paths.normalized).unwrap();
    assert_eq!(records.len(), 7);
    let ids: Vec<&str> = records.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(ids[0], "item-0");
    assert_eq!(ids[6], "item-6");

    assert_eq!(RawStore::new(&paths.raw).count().unwrap(), 7);
    let saved = ExportState::load(&paths.state).unwrap().unwrap();
    assert_eq!(saved.offset, 7);
}

#[tokio::test]
async fn test_short_page_mid_listing_keeps_fetching() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new(7).with_page_caps(vec![2]));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 3));

    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.state.offset, 7);
    assert!(report.state.is_complete());
    let offsets: Vec<u64> = source.requests().iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 2, 5]);

    let paths = ExportPaths::under(dir.path());
    assert_eq!(JsonlScan::of(&paths.normalized).unwrap().unique_ids, 7);
    assert_eq!(RawStore::new(&paths.raw).count().unwrap(), 7);

    // nothing left for a second run
    let mut again = ExportDriver::new(ScriptedSource::new(7), credential(), fast_config(dir.path(), 3));
    let rerun = again.run().await.unwrap();
    assert_eq!(rerun.batches, 0);
    assert_eq!(rerun.state.offset, 7);
}

#[tokio::test]
async fn test_write_failure_keeps_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let paths = ExportPaths::under(dir.path());
    let normalized = paths.normalized.clone();
    let saved_lines = Arc::new(Mutex::new(String::new()));

    // turn the normalized file into a directory before the second page lands
    let hook_lines = Arc::clone(&saved_lines);
    let source = ScriptedSource::new(9).before_page(2, move || {
        *hook_lines.lock().unwrap() = std::fs::read_to_string(&normalized).unwrap();
        std::fs::remove_file(&normalized).unwrap();
        std::fs::create_dir(&normalized).unwrap();
    });
    let mut driver = ExportDriver::new(source, credential(), fast_config(dir.path(), 3));

    let report = driver.run().await.unwrap();

    assert_eq!(report.status.class(), Some("persistence"));
    assert_eq!(report.status.exit_code(), 1);
    assert_eq!(report.batches, 1);
    let saved = ExportState::load(&paths.state).unwrap().unwrap();
    assert_eq!(saved.offset, 3);
    assert_eq!(saved.stored_articles, 3);
    assert!(!saved.is_complete());

    std::fs::remove_dir(&paths.normalized).unwrap();
    std::fs::write(&paths.normalized, saved_lines.lock().unwrap().as_str()).unwrap();

    let mut resumed = ExportDriver::new(ScriptedSource::new(9), credential(), fast_config(dir.path(), 3));
    let report = resumed.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.resumed_from, 3);
    assert_eq!(report.state.offset, 9);
    let scan = JsonlScan::of(&paths.normalized).unwrap();
    assert_eq!(scan.lines, 9);
    assert_eq!(scan.unique_ids, 9);
}

#[tokio::test]
async fn test_normalized_records_carry_canonical_fields() {
    let dir = TempDir::new().unwrap();
    let mut driver = ExportDriver::new(ScriptedSource::new(2), credential(), fast_config(dir.path(), 5));
    driver.run().await.unwrap();

    let records = read_records(&ExportPaths::under(dir.path()).normalized).unwrap();
    let first: &ArticleRecord = &records[0];
    assert_eq!(first.resolved_url.as_deref(), Some("https://example.com/0"));
    assert_eq!(first.time_added.as_deref(), Some("2023-11-14T22:13:20Z"));
    assert_eq!(first.word_count, Some(321));
    assert!(first.tags.contains("rust"));
    assert_eq!(
        first.original.get("item_id").and_then(|v| v.as_str()),
        Some("item-0")
    );
}

#[tokio::test]
async fn test_article_cap_stops_after_exact_count() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new(100));
    let config = fast_config(dir.path(), 5).with_max_articles(Some(10));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), config);

    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert!(report.capped);
    assert_eq!(source.calls(), 2);
    assert_eq!(report.state.total_fetched, 10);
    assert_eq!(report.state.offset, 10);
    assert!(!report.state.is_complete());
}

#[tokio::test]
async fn test_cap_trims_last_request() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new(100));
    let config = fast_config(dir.path(), 4).with_max_articles(Some(10));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), config);

    let report = driver.run().await.unwrap();

    let counts: Vec<u32> = source.requests().iter().map(|r| r.count).collect();
    assert_eq!(counts, vec![4, 4, 2]);
    assert_eq!(report.articles_this_run, 10);
}

#[tokio::test]
async fn test_auth_failure_on_first_page_persists_nothing() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::always_failing(
        FetchError::Auth {
            status: 401,
            message: "invalid access token".to_string(),
        },
        10,
    ));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 5));

    let report = driver.run().await.unwrap();

    assert_eq!(report.status.class(), Some("auth"));
    assert_eq!(report.status.exit_code(), 1);
    assert_eq!(source.calls(), 1);
    assert_eq!(report.state.offset, 0);
    assert_eq!(report.batches, 0);

    let paths = ExportPaths::under(dir.path());
    assert!(!paths.state.exists());
    assert_eq!(RawStore::new(&paths.raw).count().unwrap(), 0);
    assert_eq!(JsonlScan::of(&paths.normalized).unwrap().lines, 0);
}

#[tokio::test]
async fn test_empty_archive_completes_immediately() {
    let dir = TempDir::new().unwrap();
    let mut driver = ExportDriver::new(ScriptedSource::new(0), credential(), fast_config(dir.path(), 5));

    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.state.total_fetched, 0);
    assert!(report.state.is_complete());
}

#[tokio::test]
async fn test_second_run_while_locked_is_rejected() {
    let dir = TempDir::new().unwrap();
    let paths = ExportPaths::under(dir.path());
    std::fs::create_dir_all(paths.state.parent().unwrap()).unwrap();
    let mut lock = pocket_exporter::checkpoint::RunLock::open(paths.state.with_extension("lock")).unwrap();
    let _held = lock.try_hold().unwrap();

    let mut driver = ExportDriver::new(ScriptedSource::new(3), credential(), fast_config(dir.path(), 5));
    let err = driver.run().await.unwrap_err();
    assert_eq!(err.class(), "locked");
}

#[tokio::test]
async fn test_invalid_page_size_is_config_error() {
    let dir = TempDir::new().unwrap();
    let mut driver = ExportDriver::new(ScriptedSource::new(3), credential(), fast_config(dir.path(), 500));
    let err = driver.run().await.unwrap_err();
    assert_eq!(err.class(), "config");
}
