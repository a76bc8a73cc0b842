use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use milli::update::IndexerConfig;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::DEFAULT_MAP_SIZE;
use crate::search::{get_document_by_external_id, get_document_count, open_index};

fn options(worker_limit: usize, failure_policy: PartitionFailurePolicy) -> RunOptions {
    RunOptions {
        worker_limit,
        map_size: DEFAULT_MAP_SIZE,
        failure_policy,
        build_timeout: None,
        indexer_config: Arc::new(IndexerConfig::default()),
        cancel: CancellationToken::new(),
    }
}

fn books(prefix: &str, count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            Document::new()
                .keyword("doc_id", format!("{}-{}", prefix, i))
                .stored_text("title", format!("{} volume {}", prefix, i))
                .keyword("shelf", prefix)
        })
        .collect()
}

fn target_count(target: &Path) -> u64 {
    let index = open_index(target, DEFAULT_MAP_SIZE, &IndexerConfig::default()).unwrap();
    get_document_count(&index).unwrap()
}

#[tokio::test]
async fn test_five_documents_two_workers() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");

    let report = run("books", &target, books("b", 5), &options(2, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap();

    assert_eq!(report.partitions, 2);
    assert_eq!(report.committed, 5);
    assert_eq!(report.previous_total, Some(0));
    assert_eq!(report.merged_total, Some(5));
    assert!(!report.has_count_mismatch());
    assert_eq!(report.state, RunState::CleanedUp);
    assert!(report.failures.is_empty());
    assert!(report.merge_ms.is_some());
    assert!(!target.join(TMP_DIR).exists());

    let index = open_index(&target, DEFAULT_MAP_SIZE, &IndexerConfig::default()).unwrap();
    let doc = get_document_by_external_id(&index, "b-4").unwrap().unwrap();
    assert_eq!(doc["title"], "b volume 4");
}

#[tokio::test]
async fn test_empty_batch_does_no_work() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");

    let report = run("books", &target, Vec::new(), &options(2, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Empty);
    assert_eq!(report.committed, 0);
    assert_eq!(report.partitions, 0);
    assert!(report.merged_total.is_none());
    assert!(!target.exists());
}

#[tokio::test]
async fn test_single_worker() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");

    let report = run("books", &target, books("b", 7), &options(1, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap();

    assert_eq!(report.partitions, 1);
    assert_eq!(report.committed, 7);
    assert_eq!(report.merged_total, Some(7));
    assert_eq!(target_count(&target), 7);
}

#[tokio::test]
async fn test_runs_accumulate_into_target() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");
    let opts = options(3, PartitionFailurePolicy::BestEffort);

    run("books", &target, books("first", 4), &opts).await.unwrap();
    let report = run("books", &target, books("second", 6), &opts).await.unwrap();

    assert_eq!(report.previous_total, Some(4));
    assert_eq!(report.merged_total, Some(10));
    assert!(!report.has_count_mismatch());
}

#[tokio::test]
async fn test_one_failed_partition_best_effort() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");

    // Three partitions of two; the middle one carries an unnamed field.
    let mut batch = books("b", 6);
    batch[3] = Document::new().keyword("", "broken");

    let report = run("books", &target, batch, &options(3, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap();

    assert_eq!(report.partitions, 3);
    assert_eq!(report.state, RunState::PartiallyFailed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].partition, 1);
    assert_eq!(report.failures[0].documents, 2);
    assert_eq!(report.committed, 4);
    assert_eq!(report.merged_total, Some(4));
    assert!(!target.join(TMP_DIR).exists());
}

#[tokio::test]
async fn test_one_failed_partition_fail_fast() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");

    let mut batch = books("b", 6);
    batch[0] = Document::new().keyword("", "broken");

    let err = run("books", &target, batch, &options(3, PartitionFailurePolicy::FailFast))
        .await
        .unwrap_err();

    match err {
        Error::PartitionsFailed { total, failures } => {
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].partition, 0);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!target.join(TMP_DIR).exists());
    assert_eq!(target_count(&target), 0);
}

#[tokio::test]
async fn test_every_partition_failed_skips_merge() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");
    let batch = vec![
        Document::new().keyword("", "a"),
        Document::new().keyword("", "b"),
    ];

    let report = run("books", &target, batch, &options(2, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    assert_eq!(report.failures.len(), 2);
    assert!(report.merged_total.is_none());
    assert!(report.merge_ms.is_none());
}

#[tokio::test]
async fn test_stale_tmp_tree_is_removed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");
    let stale = target.join(TMP_DIR).join("7");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("leftover"), b"junk").unwrap();

    let report = run("books", &target, books("b", 3), &options(2, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::CleanedUp);
    assert_eq!(report.merged_total, Some(3));
    assert!(!target.join(TMP_DIR).exists());
}

#[tokio::test]
async fn test_merge_failure_keeps_tmp_tree() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");
    // The target store cannot be opened while its data file is a directory.
    std::fs::create_dir_all(target.join("data.mdb")).unwrap();

    let err = run("books", &target, books("b", 5), &options(2, PartitionFailurePolicy::BestEffort))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Merge { .. }));
    assert!(err.leaves_target_indeterminate());
    assert!(target.join(TMP_DIR).join("0").exists());
    assert!(target.join(TMP_DIR).join("1").exists());
}

#[test]
fn test_cleanup_failure_does_not_fail_run() {
    assert_eq!(finished_state(false, true), RunState::CleanedUp);
    assert_eq!(finished_state(false, false), RunState::Merged);
    assert_eq!(finished_state(true, true), RunState::PartiallyFailed);
    assert_eq!(finished_state(true, false), RunState::PartiallyFailed);
}

#[tokio::test]
async fn test_cancelled_run_fails_partitions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let target = temp_dir.path().join("books");
    let opts = options(2, PartitionFailurePolicy::BestEffort);
    opts.cancel.cancel();

    let report = run("books", &target, books("b", 4), &opts).await.unwrap();

    assert_eq!(report.state, RunState::PartiallyFailed);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.committed, 0);
}

#[tokio::test]
async fn test_watchdog_cancels_after_timeout() {
    let cancel = CancellationToken::new();
    let watchdog = spawn_watchdog(Duration::from_millis(10), cancel.clone());

    tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
        .await
        .unwrap();
    watchdog.await.unwrap();
}

#[tokio::test]
async fn test_watchdog_exits_when_cancelled_first() {
    let cancel = CancellationToken::new();
    let watchdog = spawn_watchdog(Duration::from_secs(3600), cancel.clone());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), watchdog)
        .await
        .unwrap()
        .unwrap();
}
