//! Integration tests for ReelcastService
//!
//! Exercises the caller-facing API: enqueue, status queries, cancellation,
//! recovery and retention.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness, harness_with, test_config, START};
use libreelcast::clock::ManualClock;
use libreelcast::error::{FailureKind, ReelcastError};
use libreelcast::service::events::Event;
use libreelcast::service::EnqueueOptions;
use libreelcast::store::JobUpdate;
use libreelcast::types::{ContentType, JobPayload, JobStatus, MediaRef};
use libreelcast::ReelcastService;
use tempfile::TempDir;

fn remote_image(name: &str) -> JobPayload {
    JobPayload::new(
        vec![MediaRef::new(format!("https://cdn.example.com/{}.jpg", name))],
        Some(format!("caption for {}", name)),
    )
}

#[tokio::test]
async fn test_enqueue_records_pending_job() {
    let h = harness().await;
    let job_id = h
        .service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();

    let job = h.service.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.content_type, ContentType::Image);
    assert_eq!(job.created_at, START);
    assert_eq!(job.retry_count, 0);
    assert!(job.result.is_none() && job.error.is_none());
    assert_eq!(h.service.queue().len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_status_is_idempotent() {
    let h = harness().await;
    let job_id = h
        .service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();

    let first = h.service.get_status(&job_id).await.unwrap();
    let second = h.service.get_status(&job_id).await.unwrap();
    assert_eq!(first, second);

    h.run_until_idle().await;
    let done = h.service.get_status(&job_id).await.unwrap();
    assert_eq!(done, h.service.get_status(&job_id).await.unwrap());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness().await;

    let err = h.service.get_status("no-such-job").await.unwrap_err();
    assert!(matches!(err, ReelcastError::NotFound(_)));
    assert_eq!(err.exit_code(), 4);

    assert!(matches!(
        h.service.get_events("no-such-job").await,
        Err(ReelcastError::NotFound(_))
    ));
    assert!(matches!(
        h.service.cancel("no-such-job").await,
        Err(ReelcastError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_blocked_terms_fail_at_enqueue() {
    let h = harness_with(|config| config.queue.blocked_terms = vec!["Giveaway".to_string()]).await;

    let payload = JobPayload::new(
        vec![MediaRef::new("https://cdn.example.com/a.jpg")],
        Some("Huge GIVEAWAY this weekend".to_string()),
    );
    let job_id = h
        .service
        .enqueue(ContentType::Image, payload, EnqueueOptions::default())
        .await
        .unwrap();

    let job = h.service.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, FailureKind::Validation);
    assert!(error.message.contains("Giveaway"));
    assert!(h.service.queue().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_stats_and_history() {
    let h = harness().await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        ids.push(
            h.service
                .enqueue(ContentType::Image, remote_image(name), EnqueueOptions::default())
                .await
                .unwrap(),
        );
        h.clock.advance(Duration::from_secs(1));
    }
    h.service
        .enqueue(
            ContentType::Carousel,
            JobPayload::new(vec![MediaRef::new("https://cdn.example.com/x.jpg")], None),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let stats = h.service.get_stats().await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queue_length, 3);
    assert_eq!(stats.average_processing_secs, None);

    h.run_until_idle().await;
    let stats = h.service.get_stats().await.unwrap();
    assert_eq!(stats.success, 3);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.average_processing_secs, Some(0.0));

    let history = h.service.get_history(2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content_type, ContentType::Carousel);
    assert_eq!(history[1].id, ids[2]);
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let h = harness().await;
    let job_id = h
        .service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();

    let job = h.service.cancel(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.no_retry);
    assert_eq!(job.error.unwrap().kind, FailureKind::Cancelled);

    assert_eq!(h.run_until_idle().await, 0);
    assert_eq!(h.publisher.total_calls(), 0);

    let err = h.service.cancel(&job_id).await.unwrap_err();
    assert!(matches!(err, ReelcastError::InvalidInput(_)));
}

#[tokio::test]
async fn test_cancel_in_flight_job_is_honored_before_next_attempt() {
    let h = harness().await;
    let job_id = h
        .service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();

    // A worker has claimed the entry but not started the attempt yet
    let claimed = h.service.queue().claim_next(START).await.unwrap();
    assert_eq!(claimed.as_deref(), Some(job_id.as_str()));

    let job = h.service.cancel(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.no_retry);

    h.service.queue().push(&job_id, START, START).await.unwrap();
    h.run_until_idle().await;

    let job = h.service.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().kind, FailureKind::Cancelled);
    assert_eq!(h.publisher.total_calls(), 0);
}

#[tokio::test]
async fn test_recover_requeues_interrupted_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(START);

    let job_id = {
        let service = ReelcastService::with_clock(test_config(&temp_dir), Arc::new(clock.clone()))
            .await
            .unwrap();
        let job_id = service
            .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
            .await
            .unwrap();

        // Simulate a daemon that died mid-attempt
        service.queue().claim_next(START).await.unwrap();
        service
            .store()
            .update(&job_id, JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        job_id
    };

    let service = ReelcastService::with_clock(test_config(&temp_dir), Arc::new(clock.clone()))
        .await
        .unwrap();
    assert!(service.queue().is_empty().await.unwrap());

    assert_eq!(service.recover().await.unwrap(), 1);
    let job = service.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(service.queue().len().await.unwrap(), 1);

    // Nothing left to recover
    assert_eq!(service.recover().await.unwrap(), 0);
    assert_eq!(service.queue().len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_prune_removes_only_old_finished_jobs() {
    let h = harness().await;
    let finished = h
        .service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();
    h.run_until_idle().await;

    h.clock.advance(Duration::from_secs(40 * 86_400));
    let waiting = h
        .service
        .enqueue(ContentType::Image, remote_image("b"), EnqueueOptions::default())
        .await
        .unwrap();

    let removed = h.service.prune(Duration::from_secs(30 * 86_400)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(matches!(
        h.service.get_status(&finished).await,
        Err(ReelcastError::NotFound(_))
    ));
    assert_eq!(
        h.service.get_status(&waiting).await.unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn test_prune_rejects_out_of_range_age() {
    let h = harness().await;
    h.service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();
    h.run_until_idle().await;

    let err = h.service.prune(Duration::from_secs(u64::MAX)).await.unwrap_err();
    assert!(matches!(err, ReelcastError::InvalidInput(_)));
    assert_eq!(h.service.get_history(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_subscribers_see_lifecycle_events() {
    let h = harness().await;
    let mut receiver = h.service.subscribe();

    let job_id = h
        .service
        .enqueue(ContentType::Image, remote_image("a"), EnqueueOptions::default())
        .await
        .unwrap();
    h.run_until_idle().await;

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }

    assert!(events.iter().all(|e| e.job_id() == job_id));
    assert!(matches!(
        events.first(),
        Some(Event::JobEnqueued {
            content_type: ContentType::Image,
            ..
        })
    ));
    assert!(matches!(
        events.get(1),
        Some(Event::JobStatusChanged {
            from: JobStatus::Pending,
            to: JobStatus::Processing,
            ..
        })
    ));
    assert!(matches!(events.last(), Some(Event::JobSucceeded { result, .. }) if result.id == "123"));
}
