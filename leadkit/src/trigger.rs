//! Fire-and-forget hand-off to the background worker.
//!
//! Intake and retry do not run the pipeline themselves; they call the worker
//! endpoint with the job id and only look at the status code. The call is
//! bounded by a timeout and the response body is ignored.

use crate::id::JobId;
use async_trait::async_trait;
use http::HeaderMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the job id between components.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Errors raised by a background trigger.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The HTTP client could not be created.
    #[error("failed to create trigger client: {0}")]
    Client(String),
    /// The request failed or timed out.
    #[error("background trigger request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The worker endpoint answered with a non-success status.
    #[error("background trigger returned status {0}")]
    Status(u16),
}

/// Starts background processing of a job.
#[async_trait]
pub trait BackgroundTrigger: Send + Sync {
    /// Ask the worker reachable at `origin` to process `id`.
    ///
    /// # Errors
    ///
    /// Returns error if the call fails or is not acknowledged.
    async fn trigger(&self, origin: &str, id: &JobId) -> Result<(), TriggerError>;
}

/// Trigger that POSTs `{"id": ...}` to `{origin}{path}`.
///
/// `200` and `202` count as acknowledged.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: reqwest::Client,
    path: String,
    timeout: Duration,
}

impl HttpTrigger {
    /// Create a trigger for the worker at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, TriggerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TriggerError::Client(e.to_string()))?;
        Ok(Self {
            client,
            path: path.into(),
            timeout,
        })
    }

    /// Full worker URL for an origin.
    #[must_use]
    pub fn url(&self, origin: &str) -> String {
        let path = self.path.trim();
        if path.starts_with('/') {
            format!("{}{path}", origin.trim_end_matches('/'))
        } else {
            format!("{}/{path}", origin.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl BackgroundTrigger for HttpTrigger {
    async fn trigger(&self, origin: &str, id: &JobId) -> Result<(), TriggerError> {
        let url = self.url(origin);
        debug!(
            job_id = %id,
            url = %url,
            timeout_ms = crate::millis(self.timeout),
            "triggering worker"
        );

        let response = self
            .client
            .post(&url)
            .header(CORRELATION_HEADER, id.to_string())
            .json(&serde_json::json!({ "id": id }))
            .send()
            .await
            .map_err(|e| {
                warn!(job_id = %id, error = %e, "worker trigger failed");
                TriggerError::from(e)
            })?;

        let status = response.status().as_u16();
        if status == 200 || status == 202 {
            Ok(())
        } else {
            warn!(job_id = %id, status, "worker trigger not acknowledged");
            Err(TriggerError::Status(status))
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Origin the worker is reachable at.
///
/// The configured site URL wins. Otherwise the origin is rebuilt from
/// `x-forwarded-host`/`host` and `x-forwarded-proto`, defaulting to `http`
/// for localhost and `https` elsewhere. Trailing slashes are dropped.
#[must_use]
pub fn resolve_origin(configured: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(url) = configured.map(str::trim).filter(|u| !u.is_empty()) {
        return Some(url.trim_end_matches('/').to_string());
    }
    let host = header(headers, "x-forwarded-host").or_else(|| header(headers, "host"))?;
    let proto = header(headers, "x-forwarded-proto").unwrap_or_else(|| {
        if host.contains("localhost") || host.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        }
    });
    Some(format!("{proto}://{host}").trim_end_matches('/').to_string())
}
