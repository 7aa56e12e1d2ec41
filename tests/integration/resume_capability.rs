//! Integration tests for resuming from the checkpoint

use crate::support::{credential, fast_config, ScriptedSource};
use pocket_exporter::checkpoint::ExportState;
use pocket_exporter::export::{ExportDriver, ExportStatus};
use pocket_exporter::shutdown::ShutdownCoordinator;
use pocket_exporter::storage::jsonl::JsonlScan;
use pocket_exporter::storage::{ExportPaths, RawStore};
use pocket_exporter::{DetailLevel, StateFilter};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_interrupted_run_resumes_at_exact_offset() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();

    let first = Arc::new(ScriptedSource::new(12).interrupt_after(2, shutdown.clone()));
    let mut driver = ExportDriver::new(Arc::clone(&first), credential(), fast_config(dir.path(), 4))
        .with_shutdown(shutdown);
    let report = driver.run().await.unwrap();

    assert_eq!(report.status, ExportStatus::Interrupted);
    assert_eq!(report.status.exit_code(), 130);
    assert_eq!(report.state.offset, 8);
    assert_eq!(first.calls(), 2);

    let second = Arc::new(ScriptedSource::new(12));
    let mut driver = ExportDriver::new(Arc::clone(&second), credential(), fast_config(dir.path(), 4));
    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.resumed_from, 8);
    assert_eq!(second.requests()[0].offset, 8);
    assert_eq!(report.state.offset, 12);
    assert_eq!(report.state.total_fetched, 12);

    let paths = ExportPaths::under(dir.path());
    let scan = JsonlScan::of(&paths.normalized).unwrap();
    assert_eq!(scan.unique_ids, 12);
    assert_eq!(scan.duplicate_lines, 0);
    assert_eq!(RawStore::new(&paths.raw).count().unwrap(), 12);
}

#[tokio::test]
async fn test_repersisting_a_page_creates_no_duplicates() {
    let dir = TempDir::new().unwrap();
    let capped = fast_config(dir.path(), 4).with_max_articles(Some(8));
    ExportDriver::new(ScriptedSource::new(10), credential(), capped)
        .run()
        .await
        .unwrap();

    // Rewind as if the process died between a store write and its checkpoint
    let rewound = fast_config(dir.path(), 4).with_resume_from(Some(4));
    let report = ExportDriver::new(ScriptedSource::new(10), credential(), rewound)
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.resumed_from, 4);
    assert_eq!(report.state.offset, 10);
    assert_eq!(report.state.stored_articles, 10);

    let paths = ExportPaths::under(dir.path());
    let scan = JsonlScan::of(&paths.normalized).unwrap();
    assert_eq!(scan.unique_ids, 10);
    assert_eq!(scan.duplicate_lines, 0);
    assert_eq!(RawStore::new(&paths.raw).count().unwrap(), 10);
}

#[tokio::test]
async fn test_capped_runs_continue_where_they_stopped() {
    let dir = TempDir::new().unwrap();
    for expected in [5u64, 10, 12] {
        let config = fast_config(dir.path(), 5).with_max_articles(Some(5));
        let report = ExportDriver::new(ScriptedSource::new(12), credential(), config)
            .run()
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.state.offset, expected);
    }

    let saved = ExportState::load(&ExportPaths::under(dir.path()).state)
        .unwrap()
        .unwrap();
    assert!(saved.is_complete());
}

#[tokio::test]
async fn test_fresh_discards_previous_progress() {
    let dir = TempDir::new().unwrap();
    let config = fast_config(dir.path(), 4).with_max_articles(Some(4));
    ExportDriver::new(ScriptedSource::new(10), credential(), config)
        .run()
        .await
        .unwrap();

    let source = Arc::new(ScriptedSource::new(6));
    let config = fast_config(dir.path(), 4).with_fresh(true);
    let report = ExportDriver::new(Arc::clone(&source), credential(), config)
        .run()
        .await
        .unwrap();

    assert_eq!(report.resumed_from, 0);
    assert_eq!(source.requests()[0].offset, 0);
    assert_eq!(report.state.total_fetched, 6);
}

#[tokio::test]
async fn test_checkpoint_offset_rounds_down_to_stored_articles() {
    let dir = TempDir::new().unwrap();
    let paths = ExportPaths::under(dir.path());

    // A checkpoint that claims more than the stores hold
    let mut state = ExportState::new(StateFilter::All, DetailLevel::Complete);
    state.advance(8, 8);
    state.save(&paths.state).unwrap();

    let source = Arc::new(ScriptedSource::new(8));
    let report = ExportDriver::new(Arc::clone(&source), credential(), fast_config(dir.path(), 4))
        .run()
        .await
        .unwrap();

    assert_eq!(report.resumed_from, 0);
    assert_eq!(source.requests()[0].offset, 0);
    assert_eq!(report.state.stored_articles, 8);
}
