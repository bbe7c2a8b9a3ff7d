//! Persisted job record and its state enumerations.
//!
//! A [`JobRecord`] is the single mutable document kept per submission. It is
//! written by the intake, worker and retry handlers through
//! [`RecordStore`](crate::store::RecordStore) and read by the status handler.

use crate::id::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of characters kept from an error's source chain.
pub const MAX_STACK_CHARS: usize = 6000;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for the background worker.
    #[default]
    Queued,
    /// A worker invocation is running the pipeline.
    Processing,
    /// The message was handed to the transmission service.
    Sent,
    /// The last attempt failed.
    Failed,
}

impl JobStatus {
    /// Whether a record in this status may be moved to `next`.
    ///
    /// `Sent` is terminal. `Failed` may be re-armed to `Queued` by a retry or
    /// picked up directly by a redelivered worker trigger. `Processing` may be
    /// re-armed to `Queued` when a client retries a stuck job.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Queued | Self::Processing | Self::Failed)
                | (
                    Self::Processing,
                    Self::Queued | Self::Processing | Self::Sent | Self::Failed
                )
                | (Self::Sent, Self::Sent)
                | (Self::Failed, Self::Queued | Self::Processing | Self::Failed)
        )
    }

    /// Whether this status ends a polling loop.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline checkpoint recorded at each transition.
///
/// `Render` and `Send` are the tags attached to fatal pipeline failures;
/// the other variants are emitted by the pipeline as it progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Record created or re-armed, waiting for the worker.
    Enqueue,
    /// Worker picked the job up and is planning the run.
    Plan,
    /// Document rendering started.
    RenderStart,
    /// Document rendered.
    RenderOk,
    /// Document rendering failed.
    RenderFailed,
    /// Message transmission started.
    SendStart,
    /// Message transmitted.
    SendOk,
    /// Message transmission failed.
    SendFailed,
    /// Pipeline finished.
    Done,
    /// Fatal failure while rendering.
    Render,
    /// Fatal failure while sending.
    Send,
    /// Anything unrecognised.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Stage {
    /// Wire name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Plan => "plan",
            Self::RenderStart => "render_start",
            Self::RenderOk => "render_ok",
            Self::RenderFailed => "render_failed",
            Self::SendStart => "send_start",
            Self::SendOk => "send_ok",
            Self::SendFailed => "send_failed",
            Self::Done => "done",
            Self::Render => "render",
            Self::Send => "send",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the pipeline can emit `next` right after `self`.
    ///
    /// Used only to flag odd orderings in the logs; stage writes are never
    /// rejected because failure tags may follow any checkpoint.
    #[must_use]
    pub const fn may_precede(self, next: Self) -> bool {
        match next {
            Self::Enqueue | Self::Render | Self::Send | Self::Unknown => true,
            Self::Plan => matches!(self, Self::Enqueue | Self::Plan | Self::Unknown),
            Self::RenderStart => matches!(self, Self::Plan),
            Self::RenderOk | Self::RenderFailed => matches!(self, Self::RenderStart),
            Self::SendStart => matches!(self, Self::Plan | Self::RenderOk | Self::RenderFailed),
            Self::SendOk | Self::SendFailed => matches!(self, Self::SendStart),
            Self::Done => matches!(self, Self::Plan | Self::RenderOk | Self::SendOk),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details persisted on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message; the only part exposed to clients.
    pub message: String,
    /// Optional machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Source chain, truncated to [`MAX_STACK_CHARS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Error with only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    /// Attach a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Normalize any error into its persisted form.
    ///
    /// The message is the trimmed display text (falling back to
    /// `"Unknown error"`), and the stack is the chain of sources.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let message = err.to_string().trim().to_string();
        let message = if message.is_empty() {
            "Unknown error".to_string()
        } else {
            message
        };

        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        let stack = if chain.is_empty() {
            None
        } else {
            Some(truncate_chars(&chain.join("\n"), MAX_STACK_CHARS))
        };

        Self {
            message,
            code: None,
            stack,
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Outcome of a successful transmission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    /// Message id assigned to the outgoing message.
    pub message_id: String,
    /// Recipients the transmission service accepted.
    #[serde(default)]
    pub accepted: Vec<String>,
    /// Recipients the transmission service rejected.
    #[serde(default)]
    pub rejected: Vec<String>,
}

/// One tracked submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Immutable job id.
    pub id: JobId,
    /// Correlation id; always equal to `id`.
    pub correlation_id: JobId,
    /// Slug of the site the submission came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_slug: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: JobStatus,
    /// Most recent pipeline checkpoint.
    #[serde(default)]
    pub stage: Stage,
    /// Number of pipeline runs started by the worker.
    #[serde(default)]
    pub attempts: u32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the latest worker run started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest run reached a terminal status.
    #[serde(default)]
    pub done_at: Option<DateTime<Utc>>,
    /// Validated submission captured at intake.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Fatal error of the latest run.
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    /// Recoverable rendering error of the latest run.
    #[serde(default)]
    pub render_error: Option<ErrorInfo>,
    /// Transmission result of the latest successful send.
    #[serde(default)]
    pub result: Option<SendResult>,
}

impl JobRecord {
    /// Freshly submitted record: `queued` at `enqueue` with no attempts.
    #[must_use]
    pub fn queued(id: JobId, site_slug: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            site_slug: Some(site_slug.into()),
            payload: Some(payload),
            stage: Stage::Enqueue,
            ..Self::skeleton(id, now)
        }
    }

    /// Minimal record used when patching an id that has no record yet.
    #[must_use]
    pub fn skeleton(id: JobId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            correlation_id: id,
            site_slug: None,
            status: JobStatus::Queued,
            stage: Stage::Unknown,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            done_at: None,
            payload: None,
            error: None,
            render_error: None,
            result: None,
        }
    }
}

/// Partial update merged onto a record by
/// [`RecordStore::patch`](crate::store::RecordStore::patch).
///
/// `None` leaves a field untouched. Nullable fields use a nested option so
/// that `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    /// New status.
    pub status: Option<JobStatus>,
    /// New stage.
    pub stage: Option<Stage>,
    /// New attempt count; never lowered.
    pub attempts: Option<u32>,
    /// New start timestamp.
    pub started_at: Option<Option<DateTime<Utc>>>,
    /// New completion timestamp.
    pub done_at: Option<Option<DateTime<Utc>>>,
    /// New payload.
    pub payload: Option<Option<serde_json::Value>>,
    /// New fatal error.
    pub error: Option<Option<ErrorInfo>>,
    /// New rendering error.
    pub render_error: Option<Option<ErrorInfo>>,
    /// New transmission result.
    pub result: Option<Option<SendResult>>,
}

impl RecordPatch {
    /// Empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status.
    #[must_use]
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Set the attempt count.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(Some(at));
        self
    }

    /// Set the completion timestamp.
    #[must_use]
    pub fn done_at(mut self, at: DateTime<Utc>) -> Self {
        self.done_at = Some(Some(at));
        self
    }

    /// Clear the completion timestamp left by an earlier run.
    #[must_use]
    pub fn clear_done_at(mut self) -> Self {
        self.done_at = Some(None);
        self
    }

    /// Set or clear the fatal error.
    #[must_use]
    pub fn error(mut self, error: Option<ErrorInfo>) -> Self {
        self.error = Some(error);
        self
    }

    /// Set or clear the rendering error.
    #[must_use]
    pub fn render_error(mut self, error: Option<ErrorInfo>) -> Self {
        self.render_error = Some(error);
        self
    }

    /// Set or clear the transmission result.
    #[must_use]
    pub fn result(mut self, result: Option<SendResult>) -> Self {
        self.result = Some(result);
        self
    }

    /// Set or clear the payload.
    #[must_use]
    pub fn payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Merge this patch onto `record`.
    ///
    /// The attempt counter only moves forward. Identity fields are not part
    /// of a patch and are left alone.
    pub fn apply_to(self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(stage) = self.stage {
            record.stage = stage;
        }
        if let Some(attempts) = self.attempts {
            record.attempts = record.attempts.max(attempts);
        }
        if let Some(started_at) = self.started_at {
            record.started_at = started_at;
        }
        if let Some(done_at) = self.done_at {
            record.done_at = done_at;
        }
        if let Some(payload) = self.payload {
            record.payload = payload;
        }
        if let Some(error) = self.error {
            record.error = error;
        }
        if let Some(render_error) = self.render_error {
            record.render_error = render_error;
        }
        if let Some(result) = self.result {
            record.result = result;
        }
    }
}
