//! End-to-end tests for single-job transfer execution
//!
//! Drives `TransferExecutor` against the mock object store and an on-disk
//! manifest.

mod common;

use common::{fast_policy, files_with_suffix, TestHarness};
use s3swarm::lock_guard;
use s3swarm::manifest::{JobKey, JobStatus, ManifestStore};
use s3swarm::progress::ProgressAggregator;
use s3swarm::transfer::{
    resolve_target, ErrorKind, JobOutcome, TransferError, CREDENTIAL_ERROR, INVALID_ENTRY_ERROR,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn seeded_aggregator(harness: &TestHarness) -> Arc<ProgressAggregator> {
    let aggregator = Arc::new(ProgressAggregator::new(1));
    aggregator.seed(&harness.manifest.stats());
    aggregator
}

// ============================================================================
// Successful transfers
// ============================================================================

#[tokio::test]
async fn test_nested_object_lands_under_bucket_and_folder() {
    let harness = TestHarness::new();
    let key = harness.add_object("exports", "2024/jan/report.csv", 100);
    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { bytes: 100 });
    let dest = harness.dest_root.join("exports/2024/jan/report.csv");
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 100);
    assert_eq!(harness.status(&key), JobStatus::Completed);
    assert!(harness.manifest.get(&key).unwrap().error.is_none());
    assert!(files_with_suffix(&harness.dest_root, ".lock").is_empty());

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.overall.completed_jobs, 1);
    assert_eq!(snapshot.overall.downloaded_bytes, 100);
    assert_eq!(snapshot.overall.active_workers, 0);
}

#[tokio::test]
async fn test_top_level_object_lands_in_bucket_root() {
    let harness = TestHarness::new();
    let key = harness.add_object("exports", "readme.txt", 12);
    let job = harness.manifest.get(&key).unwrap();
    let executor = harness.executor(seeded_aggregator(&harness), fast_policy(3));

    executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert!(harness.dest_root.join("exports/readme.txt").is_file());
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_retryable_failures_then_success() {
    let harness = TestHarness::new();
    let key = harness.add_object("bucket", "data/big.bin", 200_000);
    harness.store.fail_next(
        "data/big.bin",
        TransferError::from_code("SlowDown", "Please reduce your request rate"),
    );
    harness.store.fail_next(
        "data/big.bin",
        TransferError::from_message("connection reset by peer"),
    );
    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { bytes: 200_000 });
    assert_eq!(harness.store.download_calls("data/big.bin"), 3);
    assert_eq!(harness.status(&key), JobStatus::Completed);

    // Bytes reported by the failed attempts are not double counted.
    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.overall.total_retries, 2);
    assert_eq!(snapshot.overall.downloaded_bytes, 200_000);
    assert_eq!(snapshot.session_bytes, 200_000);
}

#[tokio::test]
async fn test_retries_exhausted_marks_failed() {
    let harness = TestHarness::new();
    let key = harness.add_object("bucket", "data/flaky.bin", 10);
    for _ in 0..4 {
        harness.store.fail_next(
            "data/flaky.bin",
            TransferError::new(ErrorKind::Server, "InternalError"),
        );
    }
    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    let JobOutcome::Failed { error } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(error.contains("gave up after 4 attempts"), "{}", error);
    assert_eq!(harness.store.download_calls("data/flaky.bin"), 4);

    let job = harness.manifest.get(&key).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(error.as_str()));

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.overall.failed_jobs, 1);
    assert_eq!(snapshot.overall.downloaded_bytes, 0);
    assert!(files_with_suffix(&harness.dest_root, ".lock").is_empty());
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let harness = TestHarness::new();
    let key = harness.add_object("bucket", "data/secret.bin", 10);
    harness.store.fail_next(
        "data/secret.bin",
        TransferError::from_code("AccessDenied", "Access Denied"),
    );
    let job = harness.manifest.get(&key).unwrap();
    let executor = harness.executor(seeded_aggregator(&harness), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert_eq!(harness.store.download_calls("data/secret.bin"), 1);
    assert_eq!(harness.status(&key), JobStatus::Failed);
}

#[tokio::test]
async fn test_missing_object_fails_once() {
    let harness = TestHarness::new();
    let key = JobKey::new("bucket", "data", "vanished.bin");
    harness
        .manifest
        .add_item(key.clone(), 10, "data/vanished.bin")
        .unwrap();
    let job = harness.manifest.get(&key).unwrap();
    let executor = harness.executor(seeded_aggregator(&harness), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert_eq!(harness.store.download_calls("data/vanished.bin"), 1);
}

#[tokio::test]
async fn test_cancel_during_backoff_returns_job_to_pending() {
    let harness = TestHarness::new();
    let key = harness.add_object("bucket", "data/slow.bin", 10);
    harness.store.fail_next(
        "data/slow.bin",
        TransferError::new(ErrorKind::Timeout, "read timed out"),
    );
    let job = harness.manifest.get(&key).unwrap();
    let mut policy = fast_policy(3);
    policy.initial_backoff = Duration::from_secs(60);
    policy.max_backoff = Duration::from_secs(60);
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), policy);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), executor.execute(0, job, &cancel))
        .await
        .expect("cancellation should interrupt the backoff")
        .unwrap();

    assert_eq!(outcome, JobOutcome::Deferred);
    assert_eq!(harness.status(&key), JobStatus::Pending);
    assert_eq!(harness.store.download_calls("data/slow.bin"), 1);
    assert_eq!(aggregator.snapshot().overall.active_workers, 0);
    assert!(files_with_suffix(&harness.dest_root, ".lock").is_empty());
}

// ============================================================================
// Rejections and skips
// ============================================================================

#[tokio::test]
async fn test_blank_filename_is_rejected_without_locking() {
    let harness = TestHarness::new();
    let key = JobKey::new("bucket", "data", "  ");
    harness.manifest.add_item(key.clone(), 5, "data/  ").unwrap();
    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: INVALID_ENTRY_ERROR.to_string()
        }
    );
    let job = harness.manifest.get(&key).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("empty filename"));
    assert_eq!(harness.store.total_download_calls(), 0);
    assert!(files_with_suffix(harness.temp_dir.path(), ".lock").is_empty());
    assert_eq!(aggregator.snapshot().overall.failed_jobs, 1);
}

#[tokio::test]
async fn test_existing_lock_skips_job() {
    let harness = TestHarness::new();
    let key = harness.add_object("bucket", "data/shared.bin", 10);
    let job = harness.manifest.get(&key).unwrap();

    let target = resolve_target(&harness.dest_root, &job);
    std::fs::create_dir_all(&target.dest_dir).unwrap();
    let foreign_lock = lock_guard::acquire(&target.dest_dir, &job.filename)
        .unwrap()
        .unwrap();

    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), fast_policy(3));
    let outcome = executor
        .execute(0, job.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Skipped);
    assert_eq!(harness.status(&key), JobStatus::Pending);
    assert_eq!(harness.store.total_download_calls(), 0);
    // The foreign lock is left alone.
    assert!(lock_guard::is_locked(&target.dest_dir, &job.filename));
    assert_eq!(aggregator.snapshot().overall.active_workers, 0);

    foreign_lock.release();
    assert!(!lock_guard::is_locked(&target.dest_dir, &job.filename));
}

#[tokio::test]
async fn test_hand_edited_filename_locks_next_to_destination() {
    let harness = TestHarness::new();
    harness.store.put_object("bucket", "data/escape.bin", 10);
    let key = JobKey::new("bucket", "data", "../../../escape.bin");
    harness
        .manifest
        .add_item(key.clone(), 10, "data/escape.bin")
        .unwrap();
    // A marker outside the destination root must not count as this job's lock.
    let stray_lock = harness.temp_dir.path().join("escape.bin.lock");
    std::fs::write(&stray_lock, "stray").unwrap();

    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator, fast_policy(3));
    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, JobOutcome::Completed { bytes: 10 });
    assert_eq!(harness.status(&key), JobStatus::Completed);
    let dest = harness.dest_root.join("bucket/data/escape.bin");
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 10);
    assert!(stray_lock.exists());
    assert!(files_with_suffix(&harness.dest_root, ".lock").is_empty());
}

#[tokio::test]
async fn test_filename_without_usable_segment_is_rejected() {
    let harness = TestHarness::new();
    let key = JobKey::new("bucket", "data", "../..");
    harness.manifest.add_item(key.clone(), 10, "data/x.bin").unwrap();

    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator, fast_policy(3));
    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: INVALID_ENTRY_ERROR.to_string()
        }
    );
    assert_eq!(harness.status(&key), JobStatus::Failed);
    assert_eq!(harness.store.total_download_calls(), 0);
}

// ============================================================================
// Large objects
// ============================================================================

#[tokio::test]
async fn test_large_object_fails_when_credentials_cannot_be_revalidated() {
    let harness = TestHarness::new();
    let key = JobKey::new("bucket", "media", "huge.mov");
    harness
        .manifest
        .add_item(key.clone(), 150 * 1024 * 1024, "media/huge.mov")
        .unwrap();
    harness.session.fail_revalidation();
    let job = harness.manifest.get(&key).unwrap();
    let aggregator = seeded_aggregator(&harness);
    let executor = harness.executor(aggregator.clone(), fast_policy(3));

    let outcome = executor
        .execute(0, job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Failed {
            error: CREDENTIAL_ERROR.to_string()
        }
    );
    let job = harness.manifest.get(&key).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Credential validation failed"));
    assert_eq!(harness.session.revalidate_calls(), 1);
    assert_eq!(harness.store.total_download_calls(), 0);

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.overall.downloaded_bytes, 0);
    assert_eq!(snapshot.overall.failed_jobs, 1);
    assert!(files_with_suffix(&harness.dest_root, ".lock").is_empty());
}

#[tokio::test]
async fn test_object_above_threshold_is_revalidated_first() {
    let harness = TestHarness::new();
    let small = harness.add_object("bucket", "data/small.bin", 8);
    let large = harness.add_object("bucket", "data/large.bin", 64);
    let executor = harness
        .executor(seeded_aggregator(&harness), fast_policy(3))
        .with_large_object_threshold(32);

    for key in [&small, &large] {
        let job = harness.manifest.get(key).unwrap();
        executor
            .execute(0, job, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(harness.status(key), JobStatus::Completed);
    }

    assert_eq!(harness.session.revalidate_calls(), 1);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_terminal_states_survive_reload() {
    let harness = TestHarness::new();
    let done = harness.add_object("bucket", "data/ok.bin", 10);
    let broken = harness.add_object("bucket", "data/broken.bin", 10);
    harness.store.fail_next(
        "data/broken.bin",
        TransferError::new(ErrorKind::NotFound, "NoSuchKey"),
    );
    let executor = harness.executor(seeded_aggregator(&harness), fast_policy(0));

    for key in [&done, &broken] {
        let job = harness.manifest.get(key).unwrap();
        executor
            .execute(0, job, &CancellationToken::new())
            .await
            .unwrap();
    }

    let reloaded = harness.reload_manifest();
    assert_eq!(reloaded.get(&done).unwrap().status, JobStatus::Completed);
    let failed = reloaded.get(&broken).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("NoSuchKey"));
    assert!(failed.last_updated.is_some());
}
