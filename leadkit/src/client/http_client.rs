//! HTTP client for the lead routes.

use super::{ClientError, StatusSnapshot, StatusSource};
use crate::config::RoutesConfig;
use crate::id::JobId;
use crate::trigger::CORRELATION_HEADER;
use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Result of a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResponse {
    /// Whether the server accepted the submission.
    pub ok: bool,
    /// HTTP status code.
    pub status: u16,
    /// Job id from the body or the correlation header.
    pub correlation_id: Option<JobId>,
    /// Parsed response body, `null` when it was not JSON.
    pub body: Value,
}

/// Client for a lead-service deployment.
#[derive(Debug, Clone)]
pub struct HttpLeadClient {
    client: reqwest::Client,
    base: Url,
    routes: RoutesConfig,
}

impl HttpLeadClient {
    /// Create a client for the deployment at `base`.
    ///
    /// # Errors
    ///
    /// Returns error if `base` is not a valid URL or the HTTP client cannot
    /// be built.
    pub fn new(
        base: &str,
        routes: RoutesConfig,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            base: Url::parse(base)?,
            routes,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    /// Submit a form payload.
    ///
    /// Non-success statuses are reported through [`SubmitResponse::ok`]
    /// rather than as errors, so callers can show validation issues.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be sent.
    pub async fn submit(&self, payload: &Value) -> Result<SubmitResponse, ClientError> {
        let response = self
            .client
            .post(self.url(&self.routes.submit)?)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let header_id = response
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<JobId>().ok());
        let body: Value = response.json().await.unwrap_or(Value::Null);

        let body_id = ["correlationId", "id", "cid"].iter().find_map(|field| {
            body.get(field)
                .and_then(Value::as_str)
                .and_then(|v| v.trim().parse::<JobId>().ok())
        });

        Ok(SubmitResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            correlation_id: body_id.or(header_id),
            body,
        })
    }

    /// Ask the server to retry a job. Returns whether it was accepted.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be sent.
    pub async fn retry(&self, id: &JobId) -> Result<bool, ClientError> {
        let response = self
            .client
            .post(self.url(&self.routes.retry)?)
            .header(CORRELATION_HEADER, id.to_string())
            .json(&json!({ "id": id }))
            .send()
            .await?;
        Ok(matches!(response.status(), StatusCode::OK | StatusCode::ACCEPTED))
    }
}

#[async_trait]
impl StatusSource for HttpLeadClient {
    async fn fetch_status(&self, id: &JobId) -> Result<StatusSnapshot, ClientError> {
        let mut url = self.url(&self.routes.status)?;
        url.query_pairs_mut().append_pair("id", &id.to_string());

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(ClientError::ServiceError {
                status: status.as_u16(),
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        let mut body: Value = response.json().await?;
        // Some deployments wrap the record in a "lead" object.
        if let Some(inner) = body.get_mut("lead").map(Value::take) {
            body = inner;
        }
        serde_json::from_value(body).map_err(|e| ClientError::ResponseError(e.to_string()))
    }
}
