//! Integration tests for the intake, worker, status and retry handlers
//!
//! Drives the full job lifecycle against the in-memory store with stub
//! renderer, transmitter and trigger.

mod common;

use common::{config, harness, harness_with, harness_with_store, lead, FlakyBackend};
use http::HeaderMap;
use leadkit::handlers::{LeadError, RetryOutcome, SubmissionOutcome};
use leadkit::record::JobRecord;
use leadkit::store::RecordStore;
use leadkit::{JobId, JobStatus, Stage};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_submit_queues_and_triggers() {
    let h = harness();

    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.stage, Stage::Enqueue);
    assert_eq!(view.attempts, 0);
    assert_eq!(view.correlation_id, id);
    assert_eq!(*h.trigger.calls.lock(), vec![("https://acme.example".to_string(), id)]);
}

#[tokio::test]
async fn test_status_reads_are_idempotent() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    let first = h.handlers.status(&id).await.unwrap();
    let second = h.handlers.status(&id).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_invalid_submission_creates_nothing() {
    let h = harness();

    let err = h
        .handlers
        .submit(&json!({ "name": "", "email": "nope" }), &HeaderMap::new())
        .await
        .unwrap_err();

    let LeadError::Validation(issues) = err else {
        panic!("expected validation error");
    };
    let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["email", "name"]);
    assert_eq!(h.trigger.count(), 0);
}

#[tokio::test]
async fn test_worker_sends_with_document() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    h.handlers.process(&id).await.unwrap();

    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Sent);
    assert_eq!(view.stage, Stage::Done);
    assert_eq!(view.attempts, 1);
    assert!(view.started_at.is_some());
    assert!(view.done_at.is_some());
    assert!(view.error.is_none());
    assert!(view.result.unwrap().message_id.contains(&id.to_string()));

    let sent = h.transmitter.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].has_document());
    assert_eq!(sent[0].correlation_id, id);
}

#[tokio::test]
async fn test_worker_refuses_sent_job() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();
    h.handlers.process(&id).await.unwrap();

    let err = h.handlers.process(&id).await.unwrap_err();

    assert!(matches!(err, LeadError::AlreadySent { .. }));
    assert_eq!(h.transmitter.sent.lock().len(), 1);
    assert_eq!(h.handlers.status(&id).await.unwrap().attempts, 1);
}

#[tokio::test]
async fn test_render_failure_still_sends() {
    let h = harness();
    h.renderer.fail.store(true, Ordering::SeqCst);
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    h.handlers.process(&id).await.unwrap();

    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Sent);
    assert!(view.render_error.unwrap().message.contains("engine down"));
    assert!(!h.transmitter.sent.lock()[0].has_document());
}

#[tokio::test]
async fn test_send_failure_then_retry() {
    let h = harness();
    h.transmitter.fail.store(true, Ordering::SeqCst);
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    let err = h.handlers.process(&id).await.unwrap_err();
    assert!(matches!(err, LeadError::Pipeline { stage: Stage::Send, .. }));

    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.stage, Stage::Send);
    assert!(view.error.unwrap().message.contains("channel timeout"));

    let outcome = h.handlers.retry(&id, &HeaderMap::new()).await.unwrap();
    assert_eq!(outcome, RetryOutcome::Queued);
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.stage, Stage::Enqueue);
    assert!(view.error.is_none());
    assert!(view.done_at.is_none());
    assert_eq!(view.attempts, 1);
    assert_eq!(h.trigger.count(), 2);

    h.transmitter.fail.store(false, Ordering::SeqCst);
    h.handlers.process(&id).await.unwrap();
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Sent);
    assert_eq!(view.attempts, 2);
}

#[tokio::test]
async fn test_retry_limit() {
    let mut cfg = config();
    cfg.jobs.max_attempts = 1;
    let h = harness_with(cfg);
    h.transmitter.fail.store(true, Ordering::SeqCst);
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();
    let _ = h.handlers.process(&id).await;

    let err = h.handlers.retry(&id, &HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, LeadError::RetryLimit { .. }));
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.unwrap().message, "Retry limit reached");
    assert_eq!(h.trigger.count(), 1);
}

#[tokio::test]
async fn test_retry_on_sent_job_is_noop() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();
    h.handlers.process(&id).await.unwrap();

    let outcome = h.handlers.retry(&id, &HeaderMap::new()).await.unwrap();

    assert_eq!(outcome, RetryOutcome::AlreadySent);
    assert_eq!(h.handlers.status(&id).await.unwrap().status, JobStatus::Sent);
    assert_eq!(h.trigger.count(), 1);
}

#[tokio::test]
async fn test_trigger_failure_marks_enqueue_failed() {
    let h = harness();
    h.trigger.fail.store(true, Ordering::SeqCst);

    let err = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap_err();

    let LeadError::Enqueue { id, message } = err else {
        panic!("expected enqueue error");
    };
    assert_eq!(message, "Background enqueue failed");
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.stage, Stage::Enqueue);
}

#[tokio::test]
async fn test_missing_origin_marks_enqueue_failed() {
    let mut cfg = config();
    cfg.site.url = None;
    let h = harness_with(cfg);

    let err = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap_err();

    assert!(matches!(err, LeadError::Enqueue { ref message, .. } if message == "Missing site URL"));
    assert_eq!(h.trigger.count(), 0);
}

#[tokio::test]
async fn test_unknown_id() {
    let h = harness();
    let id = JobId::new();

    assert!(matches!(h.handlers.status(&id).await, Err(LeadError::NotFound { .. })));
    assert!(matches!(h.handlers.process(&id).await, Err(LeadError::NotFound { .. })));
    assert!(matches!(
        h.handlers.retry(&id, &HeaderMap::new()).await,
        Err(LeadError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_stored_payload_that_no_longer_validates() {
    let h = harness();
    let id = JobId::new();
    h.handlers
        .store()
        .set(&JobRecord::queued(id, "acme", json!({ "name": "Ada", "email": "nope" })))
        .await
        .unwrap();

    let err = h.handlers.process(&id).await.unwrap_err();

    assert!(matches!(err, LeadError::Validation(_)));
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.stage, Stage::Enqueue);
    assert_eq!(view.error.unwrap().message, "Stored payload invalid");
    assert_eq!(view.attempts, 0);
    assert!(h.transmitter.sent.lock().is_empty());
}

#[tokio::test]
async fn test_record_without_payload() {
    let h = harness();
    let id = JobId::new();
    let mut record = JobRecord::queued(id, "acme", json!({}));
    record.payload = None;
    h.handlers.store().set(&record).await.unwrap();

    let err = h.handlers.process(&id).await.unwrap_err();

    assert!(matches!(err, LeadError::NotFound { .. }));
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.stage, Stage::Enqueue);
    assert_eq!(view.error.unwrap().message, "Missing stored payload");
    assert!(h.transmitter.sent.lock().is_empty());
}

#[tokio::test]
async fn test_store_failure_mid_run_is_recorded_at_last_stage() {
    let store = RecordStore::new("acme", Arc::new(FlakyBackend::failing_once_at(Stage::RenderOk)));
    let h = harness_with_store(config(), store);
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    let err = h.handlers.process(&id).await.unwrap_err();

    assert!(matches!(err, LeadError::Pipeline { stage: Stage::RenderOk, .. }));
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.stage, Stage::RenderOk);
    assert!(view.error.unwrap().message.contains("connection reset"));
    assert!(h.transmitter.sent.lock().is_empty());
}

#[tokio::test]
async fn test_retry_whose_trigger_fails() {
    let h = harness();
    h.transmitter.fail.store(true, Ordering::SeqCst);
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();
    let _ = h.handlers.process(&id).await;
    h.trigger.fail.store(true, Ordering::SeqCst);

    let err = h.handlers.retry(&id, &HeaderMap::new()).await.unwrap_err();

    assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(matches!(
        err,
        LeadError::Enqueue { ref message, .. } if message == "Retry enqueue failed"
    ));
    let view = h.handlers.status(&id).await.unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.stage, Stage::Enqueue);
    assert_eq!(view.error.unwrap().message, "Retry enqueue failed");
    assert_eq!(h.trigger.count(), 2);
}

#[tokio::test]
async fn test_rerun_clears_previous_completion_time() {
    let h = harness();
    h.transmitter.fail.store(true, Ordering::SeqCst);
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();
    let _ = h.handlers.process(&id).await;
    assert!(h.handlers.status(&id).await.unwrap().done_at.is_some());

    h.transmitter.fail.store(false, Ordering::SeqCst);
    *h.transmitter.watch.lock() = Some(h.handlers.store().clone());
    h.handlers.process(&id).await.unwrap();

    let seen = h.transmitter.records_at_send.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, JobStatus::Processing);
    assert!(seen[0].done_at.is_none());
    assert!(seen[0].error.is_none());
    assert!(h.handlers.status(&id).await.unwrap().done_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_background_run() {
    let h = harness();
    *h.transmitter.delay.lock() = Some(Duration::from_secs(5));
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    h.handlers.spawn_process(id);
    assert_eq!(h.handlers.in_flight(), 1);

    assert!(h.handlers.drain(Duration::from_secs(30)).await);
    assert_eq!(h.handlers.in_flight(), 0);
    assert_eq!(h.handlers.status(&id).await.unwrap().status, JobStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn test_drain_gives_up_after_grace() {
    let h = harness();
    *h.transmitter.delay.lock() = Some(Duration::from_secs(120));
    let id = h.handlers.submit(&lead(), &HeaderMap::new()).await.unwrap();

    h.handlers.spawn_process(id);

    assert!(!h.handlers.drain(Duration::from_secs(1)).await);
    assert_eq!(h.handlers.in_flight(), 1);
    assert_eq!(h.handlers.status(&id).await.unwrap().status, JobStatus::Processing);
}

#[tokio::test]
async fn test_submission_runs_pipeline_inline() {
    let h = harness();
    let body = json!({ "payload": { "id": "form-991", "data": lead() } });

    let outcome = h.handlers.submission(&body, &HeaderMap::new()).await;

    let SubmissionOutcome::Ok { correlation_id } = outcome else {
        panic!("expected ok");
    };
    assert!(h.handlers.store().get(&correlation_id).await.unwrap().is_none());
    assert_eq!(h.trigger.count(), 0);
    let sent = h.transmitter.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].correlation_id, correlation_id);
    assert!(sent[0].has_document());
}

#[tokio::test]
async fn test_submission_ignores_invalid_fields() {
    let h = harness();

    let outcome = h
        .handlers
        .submission(&json!({ "payload": { "data": { "name": "Ada" } } }), &HeaderMap::new())
        .await;

    let SubmissionOutcome::Ignored { reason, errors } = outcome else {
        panic!("expected ignored");
    };
    assert_eq!(reason, "invalid");
    assert_eq!(errors[0].path, "email");
    assert!(h.transmitter.sent.lock().is_empty());
}

#[tokio::test]
async fn test_submission_reports_pipeline_failure() {
    let h = harness();
    h.transmitter.fail.store(true, Ordering::SeqCst);

    let outcome = h.handlers.submission(&lead(), &HeaderMap::new()).await;

    let SubmissionOutcome::Error { message, .. } = outcome else {
        panic!("expected error");
    };
    assert!(message.contains("channel timeout"));
}
