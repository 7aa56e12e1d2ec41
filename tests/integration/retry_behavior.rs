//! Integration tests for retries inside a running export

use crate::support::{credential, fast_config, rate_limited, transient, ScriptedSource};
use pocket_exporter::export::{ExportDriver, RetryConfig};
use pocket_exporter::fetcher::FetchError;
use pocket_exporter::storage::jsonl::JsonlScan;
use pocket_exporter::storage::ExportPaths;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_transient_failures_are_retried_transparently() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(
        ScriptedSource::new(6).with_script(vec![None, Some(transient()), Some(transient())]),
    );
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 3));

    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.retries, 2);
    assert_eq!(report.state.total_fetched, 6);
    // second page was requested three times at the same offset
    let offsets: Vec<u64> = source.requests().iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 3, 3, 3]);
}

#[tokio::test]
async fn test_rate_limit_is_counted_and_recovered() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new(4).with_script(vec![Some(rate_limited())]);
    let mut driver = ExportDriver::new(source, credential(), fast_config(dir.path(), 4));

    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rate_limit_events, 1);
    assert_eq!(report.retries, 1);
}

#[tokio::test]
async fn test_exhausted_retries_keep_previous_checkpoint() {
    let dir = TempDir::new().unwrap();
    let retry = RetryConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        ..RetryConfig::default()
    };
    let mut script = vec![None];
    script.extend(std::iter::repeat(Some(transient())).take(3));
    let source = Arc::new(ScriptedSource::new(10).with_script(script));
    let config = fast_config(dir.path(), 5).with_retry(retry);
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), config);

    let report = driver.run().await.unwrap();

    assert_eq!(report.status.class(), Some("network_exhausted"));
    assert_eq!(source.calls(), 4);
    assert_eq!(report.state.offset, 5);
    assert_eq!(
        JsonlScan::of(&ExportPaths::under(dir.path()).normalized)
            .unwrap()
            .unique_ids,
        5
    );
}

#[tokio::test]
async fn test_persistent_rate_limit_fails_with_its_own_class() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::always_failing(rate_limited(), 20);
    let config = fast_config(dir.path(), 5);
    let mut driver = ExportDriver::new(source, credential(), config);

    let report = driver.run().await.unwrap();

    assert_eq!(report.status.class(), Some("rate_limit_exhausted"));
    assert_eq!(report.rate_limit_events, 6);
    assert_eq!(report.state.offset, 0);
}

#[tokio::test]
async fn test_format_errors_have_a_smaller_budget() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::always_failing(
        FetchError::Format("missing completion indicator 'complete'".to_string()),
        20,
    ));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 5));

    let report = driver.run().await.unwrap();

    assert_eq!(report.status.class(), Some("format"));
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::always_failing(
        FetchError::Fatal("unexpected status 418".to_string()),
        5,
    ));
    let mut driver = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 5));

    let report = driver.run().await.unwrap();

    assert_eq!(report.status.class(), Some("fatal"));
    assert_eq!(source.calls(), 1);
}
