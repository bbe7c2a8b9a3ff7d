//! Integration tests for the HTTP routes

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{harness, lead, Harness};
use leadkit::{router, JobId, JobStatus};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(h.handlers.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for_status(h: &Harness, id: &JobId, want: JobStatus) {
    for _ in 0..100 {
        if h.handlers.status(id).await.unwrap().status == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached {want}");
}

#[tokio::test]
async fn test_submit_route() {
    let h = harness();

    let (status, headers, body) = send(app(&h), post_json("/api/leads", &lead())).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let id = body["id"].as_str().unwrap();
    assert_eq!(body["correlationId"], id);
    assert_eq!(body["cid"], id);
    assert_eq!(headers["x-correlation-id"], id);
}

#[tokio::test]
async fn test_submit_form_encoded() {
    let h = harness();
    let request = Request::post("/api/leads")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("name=Ada&email=ada%40example.com"))
        .unwrap();

    let (status, _, _) = send(app(&h), request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_submit_rejects_invalid_payloads() {
    let h = harness();

    let (status, _, body) = send(app(&h), post_json("/api/leads", &json!({ "name": "Ada" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid");
    assert_eq!(body["errors"][0]["path"], "email");

    let request = Request::post("/api/leads")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{broken"))
        .unwrap();
    let (status, _, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid request body");
}

#[tokio::test]
async fn test_background_route_runs_pipeline() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &axum::http::HeaderMap::new()).await.unwrap();

    let request = post_json("/api/leads/process", &json!({ "id": id }));
    let (status, _, body) = send(app(&h), request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "status": "accepted", "id": id }));
    wait_for_status(&h, &id, JobStatus::Sent).await;

    let (status, _, _) = send(app(&h), post_json("/api/leads/process", &json!({ "id": id }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_background_route_requires_id() {
    let h = harness();

    let (status, _, body) = send(app(&h), post_json("/api/leads/process", &json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing id");

    let request = post_json("/api/leads/process", &json!({ "id": "nope" }));
    let (status, _, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid id");
}

#[tokio::test]
async fn test_status_route() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &axum::http::HeaderMap::new()).await.unwrap();

    let request = Request::get(format!("/api/leads/status?id={id}"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(app(&h), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body["status"], "queued");
    assert_eq!(body["stage"], "enqueue");
    assert_eq!(body["attempts"], 0);
    assert!(body.get("payload").is_none());
}

#[tokio::test]
async fn test_status_route_by_header_and_unknown_id() {
    let h = harness();
    let id = JobId::new();

    let request = Request::get("/api/leads/status")
        .header("x-correlation-id", id.to_string())
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(app(&h), request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body, json!({ "status": "error", "message": "Not found", "id": id }));
}

#[tokio::test]
async fn test_retry_route() {
    let h = harness();
    let id = h.handlers.submit(&lead(), &axum::http::HeaderMap::new()).await.unwrap();

    let request = Request::post(format!("/api/leads/retry?jobId={id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "status": "queued", "id": id }));

    h.handlers.process(&id).await.unwrap();
    let request = post_json("/api/leads/retry", &json!({ "leadId": id }));
    let (status, _, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "id": id }));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let h = harness();
    let big = "x".repeat(leadkit::router::MAX_BODY_BYTES + 1);

    let (status, _, _) = send(
        app(&h),
        post_json("/api/leads", &json!({ "name": big, "email": "ada@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_submission_route_envelopes() {
    let h = harness();
    let route = "/api/leads/submission-created";

    let body = json!({ "payload": { "id": "form-7", "data": lead() } });
    let (status, headers, body) = send(app(&h), post_json(route, &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(headers["x-correlation-id"], body["correlationId"].as_str().unwrap());

    let (status, _, body) = send(app(&h), post_json(route, &json!({ "name": "Ada" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["reason"], "invalid");
    assert_eq!(body["errors"][0]["path"], "email");

    let request = Request::post(route)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{broken"))
        .unwrap();
    let (status, _, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ignored", "reason": "invalid body" }));

    h.transmitter.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    let (status, _, body) = send(app(&h), post_json(route, &lead())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("channel timeout"));
    assert!(body["correlationId"].is_string());
}

#[tokio::test]
async fn test_submission_route_is_post_only() {
    let h = harness();
    let request = Request::get("/api/leads/submission-created")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(app(&h), request).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
