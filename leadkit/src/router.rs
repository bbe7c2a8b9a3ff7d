//! HTTP surface for the lead handlers.
//!
//! | route                   | method | handler                       |
//! |-------------------------|--------|-------------------------------|
//! | `routes.submit`         | POST   | [`LeadHandlers::submit`]      |
//! | `jobs.background_path`  | POST   | [`LeadHandlers::process`]     |
//! | `routes.status`         | GET    | [`LeadHandlers::status`]      |
//! | `routes.retry`          | POST   | [`LeadHandlers::retry`]       |
//! | `routes.submission`     | POST   | [`LeadHandlers::submission`]  |
//!
//! The worker route acknowledges with `202` once the job is known to be
//! runnable and runs the pipeline in a tracked background task, so the
//! trigger call returns well within its timeout.

use crate::handlers::{parse_id, LeadError, LeadHandlers, RetryOutcome, SubmissionOutcome};
use crate::trigger::CORRELATION_HEADER;
use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Body and query fields that may carry the job id, in lookup order.
const ID_FIELDS: [&str; 5] = ["id", "leadId", "cid", "correlationId", "jobId"];

/// Build the router for a set of handlers.
pub fn router(handlers: Arc<LeadHandlers>) -> Router {
    let routes = handlers.config().routes.clone();
    let background = handlers.background_path();

    Router::new()
        .route(&routes.submit, post(submit))
        .route(&background, post(process))
        .route(&routes.status, get(status))
        .route(&routes.retry, post(retry))
        .route(&routes.submission, post(submission))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(handlers)
}

/// Parse a request body into a JSON object.
///
/// JSON bodies must be objects; form bodies become string fields; anything
/// else is parsed as JSON on a best-effort basis and otherwise ignored.
///
/// # Errors
///
/// Returns [`LeadError::InvalidRequest`] for a malformed JSON body.
pub fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, LeadError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("application/json") {
        return match serde_json::from_slice::<Value>(body) {
            Ok(value @ Value::Object(_)) => Ok(value),
            _ => Err(LeadError::InvalidRequest("Invalid request body".to_string())),
        };
    }
    if content_type.contains("application/x-www-form-urlencoded") {
        let fields: Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Ok(Value::Object(fields));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        _ => Ok(Value::Object(Map::new())),
    }
}

fn id_from_body(body: &Value) -> Option<String> {
    ID_FIELDS.iter().find_map(|field| match body.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn id_from_query(query: Option<&str>) -> Option<String> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query?.as_bytes())
        .into_owned()
        .collect();
    ID_FIELDS.iter().find_map(|field| {
        pairs
            .iter()
            .find(|(k, v)| k == field && !v.trim().is_empty())
            .map(|(_, v)| v.trim().to_string())
    })
}

fn id_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn with_correlation(id: impl std::fmt::Display, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn submit(
    State(handlers): State<Arc<LeadHandlers>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match parse_body(&headers, &body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(site = %handlers.context().adapter.slug(), "intake body invalid");
            return e.into_response();
        }
    };
    match handlers.submit(&payload, &headers).await {
        Ok(id) => with_correlation(
            id,
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "queued", "id": id, "correlationId": id, "cid": id })),
            )
                .into_response(),
        ),
        Err(e) => match e.job_id() {
            Some(id) => with_correlation(id, e.into_response()),
            None => e.into_response(),
        },
    }
}

async fn process(
    State(handlers): State<Arc<LeadHandlers>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match parse_body(&headers, &body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    let raw = id_from_body(&body).or_else(|| id_from_header(&headers));
    let id = match parse_id(raw.as_deref()) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = handlers.runnable(&id).await {
        return e.into_response();
    }

    handlers.spawn_process(id);

    with_correlation(
        id,
        (StatusCode::ACCEPTED, Json(json!({ "status": "accepted", "id": id }))).into_response(),
    )
}

async fn status(
    State(handlers): State<Arc<LeadHandlers>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let raw = id_from_query(query.as_deref()).or_else(|| id_from_header(&headers));
    let response = match parse_id(raw.as_deref()) {
        Ok(id) => match handlers.status(&id).await {
            Ok(view) => (StatusCode::OK, Json(view)).into_response(),
            Err(e) => e.into_response(),
        },
        Err(e) => e.into_response(),
    };
    ([(header::CACHE_CONTROL, "no-store")], response).into_response()
}

async fn retry(
    State(handlers): State<Arc<LeadHandlers>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    // An unreadable retry body is treated as empty; the id may still come
    // from the query or the header.
    let body = parse_body(&headers, &body).unwrap_or_default();
    let raw = id_from_body(&body)
        .or_else(|| id_from_query(query.as_deref()))
        .or_else(|| id_from_header(&headers));
    let id = match parse_id(raw.as_deref()) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    match handlers.retry(&id, &headers).await {
        Ok(RetryOutcome::AlreadySent) => {
            (StatusCode::OK, Json(json!({ "status": "ok", "id": id }))).into_response()
        }
        Ok(RetryOutcome::Queued) => with_correlation(
            id,
            (StatusCode::ACCEPTED, Json(json!({ "status": "queued", "id": id }))).into_response(),
        ),
        Err(e) => e.into_response(),
    }
}

async fn submission(
    State(handlers): State<Arc<LeadHandlers>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let outcome = match parse_body(&headers, &body) {
        Ok(body) => handlers.submission(&body, &headers).await,
        Err(_) => SubmissionOutcome::invalid_body(),
    };
    let response = (StatusCode::OK, Json(&outcome)).into_response();
    match outcome.correlation_id() {
        Some(id) => with_correlation(id, response),
        None => response,
    }
}
