//! Submission webhook: run the pipeline inline for a form provider's
//! "submission created" event.
//!
//! Nothing is stored and nothing can be retried. The provider only needs to
//! know the event was consumed, so every outcome is a `200` whose body says
//! what happened.

use super::LeadHandlers;
use crate::adapter::FieldIssue;
use crate::id::JobId;
use crate::pipeline::{run_pipeline, PipelineOptions};
use crate::trigger::CORRELATION_HEADER;
use http::HeaderMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// What a submission webhook call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmissionOutcome {
    /// The message was sent.
    Ok {
        /// Correlation id of the run.
        #[serde(rename = "correlationId")]
        correlation_id: JobId,
    },
    /// The event carried nothing usable; the pipeline did not run.
    Ignored {
        /// Why the event was ignored.
        reason: String,
        /// Validation issues, when the submission failed validation.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<FieldIssue>,
    },
    /// The pipeline ran and failed.
    Error {
        /// Failure message.
        message: String,
        /// Correlation id of the run.
        #[serde(rename = "correlationId")]
        correlation_id: JobId,
    },
}

impl SubmissionOutcome {
    /// Outcome for a body that could not be parsed.
    #[must_use]
    pub fn invalid_body() -> Self {
        Self::Ignored {
            reason: "invalid body".to_string(),
            errors: Vec::new(),
        }
    }

    /// Correlation id of the run, if the pipeline ran.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<JobId> {
        match self {
            Self::Ok { correlation_id } | Self::Error { correlation_id, .. } => {
                Some(*correlation_id)
            }
            Self::Ignored { .. } => None,
        }
    }
}

/// Split a webhook body into the submitted fields and the provider's
/// submission id.
///
/// Accepts `{payload: {id, data}}`, `{id, data}` or the bare fields.
#[must_use]
pub fn extract_submission(body: &Value) -> (Value, Option<String>) {
    let empty = Value::Object(Map::new());
    let envelope = if body.is_object() { body } else { &empty };
    let submission = envelope
        .get("payload")
        .filter(|p| p.is_object())
        .unwrap_or(envelope);
    let data = submission
        .get("data")
        .filter(|d| d.is_object())
        .unwrap_or(submission)
        .clone();
    let id = match submission.get("id") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty());
    (data, id)
}

/// Correlation id for a webhook run: the submission id, then the
/// correlation header, then a fresh id.
///
/// Values that are not job ids are mapped to a stable name-based UUID so
/// the same submission always logs under the same id.
#[must_use]
pub fn submission_correlation_id(submission_id: Option<&str>, headers: &HeaderMap) -> JobId {
    let header = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    submission_id
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or(header)
        .map_or_else(JobId::new, |raw| {
            raw.parse().unwrap_or_else(|_| {
                JobId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes()))
            })
        })
}

impl LeadHandlers {
    /// Validate a webhook submission and run the pipeline inline.
    ///
    /// Renders when rendering is enabled and always sends. Failures are
    /// reported in the outcome, never as an error.
    pub async fn submission(&self, body: &Value, headers: &HeaderMap) -> SubmissionOutcome {
        let started = Instant::now();
        let (fields, submission_id) = extract_submission(body);

        let data = match self.context.adapter.validate(&fields) {
            Ok(data) => data,
            Err(errors) => {
                info!(site = %self.site(), issues = errors.len(), "submission ignored, invalid");
                return SubmissionOutcome::Ignored {
                    reason: "invalid".to_string(),
                    errors,
                };
            }
        };

        let correlation_id = submission_correlation_id(submission_id.as_deref(), headers);
        let options = PipelineOptions {
            need_render: self.config.pipeline.render_enabled,
            also_send: true,
            correlation_id: Some(correlation_id),
            observer: None,
        };

        match run_pipeline(&self.context, &data, self.config.pipeline, options).await {
            Ok(_) => {
                info!(
                    job_id = %correlation_id,
                    site = %self.site(),
                    dur_ms = crate::millis(started.elapsed()),
                    "submission ok"
                );
                SubmissionOutcome::Ok { correlation_id }
            }
            Err(e) => {
                error!(
                    job_id = %correlation_id,
                    site = %self.site(),
                    error = %e,
                    dur_ms = crate::millis(started.elapsed()),
                    "submission failed"
                );
                SubmissionOutcome::Error {
                    message: e.to_string(),
                    correlation_id,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_extract_wrapped_submission() {
        let body = json!({ "payload": { "id": " 42ab ", "data": { "name": "Ada" } } });
        let (data, id) = extract_submission(&body);
        assert_eq!(data, json!({ "name": "Ada" }));
        assert_eq!(id.as_deref(), Some("42ab"));
    }

    #[test]
    fn test_extract_bare_fields() {
        let (data, id) = extract_submission(&json!({ "name": "Ada", "email": "a@b.co" }));
        assert_eq!(data, json!({ "name": "Ada", "email": "a@b.co" }));
        assert!(id.is_none());

        let (data, id) = extract_submission(&json!(["not", "an", "object"]));
        assert_eq!(data, json!({}));
        assert!(id.is_none());
    }

    #[test]
    fn test_correlation_id_precedence() {
        let known = JobId::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            CORRELATION_HEADER,
            HeaderValue::from_str(&known.to_string()).unwrap(),
        );

        assert_eq!(submission_correlation_id(None, &headers), known);

        let from_submission = submission_correlation_id(Some("sub-123"), &headers);
        assert_ne!(from_submission, known);
        assert_eq!(from_submission, submission_correlation_id(Some("sub-123"), &HeaderMap::new()));

        let fresh = submission_correlation_id(None, &HeaderMap::new());
        assert_ne!(fresh, submission_correlation_id(None, &HeaderMap::new()));
    }

    #[test]
    fn test_outcome_wire_shape() {
        let id = JobId::new();
        assert_eq!(
            serde_json::to_value(SubmissionOutcome::Ok { correlation_id: id }).unwrap(),
            json!({ "status": "ok", "correlationId": id })
        );
        assert_eq!(
            serde_json::to_value(SubmissionOutcome::invalid_body()).unwrap(),
            json!({ "status": "ignored", "reason": "invalid body" })
        );
    }
}
