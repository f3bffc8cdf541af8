//! The optimistic placeholder shown while a job create is in flight.
//!
//! A refetch that lands after the store committed the create but before the
//! create call returned shows both the placeholder and the stored row. The
//! window closes when the create returns.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use leadsync::model::{JobParams, JobStatus};
use leadsync::{CreateJobOutcome, DuplicatePolicy, SyncError};

use common::*;

#[tokio::test]
async fn test_placeholder_and_stored_row_coexist_until_create_returns() {
    let flaky = FlakyStore::new(memory_store());
    let engine = engine_over(flaky.clone(), RecordingTrigger::accepting());
    engine.start(OWNER).await.unwrap();

    let release = flaky.hold_creates();
    let pending = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .create_job(JobParams::new("architects", "austin", 10), DuplicatePolicy::Ask)
                .await
        }
    });
    flaky.created.notified().await;

    let cached = cached_jobs(&engine);
    assert_eq!(cached.len(), 1);
    assert!(cached[0].is_placeholder());
    assert_eq!(cached[0].status, JobStatus::Pending);

    // A poll lands inside the window.
    engine.queries().fetch_jobs(OWNER).await.unwrap();
    let cached = cached_jobs(&engine);
    assert_eq!(cached.len(), 2);
    assert_eq!(cached.iter().filter(|job| job.is_placeholder()).count(), 1);

    release.notify_one();
    let outcome = pending.await.unwrap().unwrap();
    let CreateJobOutcome::Created(job) = outcome else {
        panic!("expected a created job");
    };

    let cached = cached_jobs(&engine);
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, job.id);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_create_removes_placeholder() {
    let flaky = FlakyStore::new(memory_store());
    let trigger = RecordingTrigger::accepting();
    let engine = engine_over(flaky.clone(), trigger.clone());
    engine.start(OWNER).await.unwrap();

    flaky.fail_job_writes.store(true, Ordering::SeqCst);
    let err = engine
        .create_job(JobParams::new("architects", "austin", 10), DuplicatePolicy::Ask)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Gateway(_)));
    assert!(cached_jobs(&engine).is_empty());
    assert!(trigger.calls().is_empty());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_create_still_converges() {
    let flaky = FlakyStore::new(memory_store());
    let trigger = RecordingTrigger::accepting();
    let engine = engine_over(flaky.clone(), trigger.clone());
    engine.start(OWNER).await.unwrap();

    let release = flaky.hold_creates();
    let attempt = tokio::time::timeout(
        Duration::from_secs(2),
        engine.create_job(JobParams::new("architects", "austin", 10), DuplicatePolicy::Ask),
    )
    .await;
    assert!(attempt.is_err(), "the create should still be held");

    release.notify_one();
    for _ in 0..50 {
        if !trigger.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    drain().await;

    let cached = cached_jobs(&engine);
    assert_eq!(cached.len(), 1);
    assert!(!cached[0].is_placeholder());
    assert_eq!(trigger.calls().len(), 1);
    assert_eq!(trigger.calls()[0].job_id, cached[0].id);

    // Later refetches keep a single stored row.
    engine.queries().fetch_jobs(OWNER).await.unwrap();
    assert_eq!(cached_jobs(&engine).len(), 1);
    engine.shutdown().await;
}
