//! Request handlers driving the job lifecycle.
//!
//! [`LeadHandlers`] owns everything a request needs: the record store, the
//! worker context, the background trigger and the configuration. Each
//! operation lives in its own module:
//!
//! - [`intake`]: validate a submission, create the record, trigger the worker
//! - [`worker`]: run the pipeline for a queued job and persist every stage
//! - [`retry`]: re-arm a failed job within the attempt limit
//! - [`status`]: client-facing projection of a record
//! - [`submission`]: synchronous webhook running the pipeline inline
//!
//! Handlers are transport-agnostic; [`crate::router`] maps them onto HTTP.

pub mod intake;
pub mod retry;
pub mod status;
pub mod submission;
pub mod worker;

pub use retry::RetryOutcome;
pub use status::{PublicError, StatusView};
pub use submission::SubmissionOutcome;

use crate::adapter::FieldIssue;
use crate::config::LeadKitConfig;
use crate::id::JobId;
use crate::pipeline::WorkerContext;
use crate::record::Stage;
use crate::store::{RecordStore, StoreError};
use crate::trigger::BackgroundTrigger;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::error;

/// Handler failures, each mapped to an HTTP status and a small envelope.
#[derive(Debug, thiserror::Error)]
pub enum LeadError {
    /// The payload failed schema validation; no record was created.
    #[error("validation failed")]
    Validation(Vec<FieldIssue>),
    /// The request was malformed (bad body, missing or malformed id).
    #[error("{0}")]
    InvalidRequest(String),
    /// No usable record for the id.
    #[error("Not found")]
    NotFound {
        /// Requested id.
        id: JobId,
    },
    /// The background worker could not be triggered.
    #[error("{message}")]
    Enqueue {
        /// Job id.
        id: JobId,
        /// Failure message.
        message: String,
    },
    /// The pipeline failed.
    #[error("{message}")]
    Pipeline {
        /// Job id.
        id: JobId,
        /// Failure message.
        message: String,
        /// Stage the failure was recorded at.
        stage: Stage,
    },
    /// The job used up its attempts.
    #[error("Retry limit reached")]
    RetryLimit {
        /// Job id.
        id: JobId,
    },
    /// The job was already delivered.
    #[error("Already sent")]
    AlreadySent {
        /// Job id.
        id: JobId,
    },
    /// The record store failed.
    #[error("record store failed: {0}")]
    Store(#[from] StoreError),
}

impl LeadError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadySent { .. } => StatusCode::CONFLICT,
            Self::RetryLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Enqueue { .. } | Self::Pipeline { .. } | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Job id the error refers to, if any.
    #[must_use]
    pub const fn job_id(&self) -> Option<JobId> {
        match self {
            Self::NotFound { id }
            | Self::Enqueue { id, .. }
            | Self::Pipeline { id, .. }
            | Self::RetryLimit { id }
            | Self::AlreadySent { id } => Some(*id),
            Self::Validation(_) | Self::InvalidRequest(_) | Self::Store(_) => None,
        }
    }
}

impl IntoResponse for LeadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Validation(errors) => json!({ "status": "invalid", "errors": errors }),
            Self::Store(e) => {
                // Store internals stay in the logs.
                error!(error = %e, "record store failure");
                json!({ "status": "error", "message": "Internal server error" })
            }
            other => match other.job_id() {
                Some(id) => json!({ "status": "error", "message": other.to_string(), "id": id }),
                None => json!({ "status": "error", "message": other.to_string() }),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Parse a raw job id from a request.
///
/// # Errors
///
/// Returns [`LeadError::InvalidRequest`] if the id is missing or malformed.
pub fn parse_id(raw: Option<&str>) -> Result<JobId, LeadError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LeadError::InvalidRequest("Missing id".to_string()))?;
    raw.parse()
        .map_err(|_| LeadError::InvalidRequest("Invalid id".to_string()))
}

/// Intake, worker, retry and status operations over one site.
#[derive(Clone)]
pub struct LeadHandlers {
    store: RecordStore,
    context: Arc<WorkerContext>,
    trigger: Arc<dyn BackgroundTrigger>,
    config: Arc<LeadKitConfig>,
    runs: TaskTracker,
}

impl std::fmt::Debug for LeadHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadHandlers")
            .field("store", &self.store)
            .field("context", &self.context)
            .field("trigger", &"BackgroundTrigger")
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl LeadHandlers {
    /// Assemble the handlers.
    #[must_use]
    pub fn new(
        store: RecordStore,
        context: Arc<WorkerContext>,
        trigger: Arc<dyn BackgroundTrigger>,
        config: Arc<LeadKitConfig>,
    ) -> Self {
        Self {
            store,
            context,
            trigger,
            config,
            runs: TaskTracker::new(),
        }
    }

    /// Record store.
    #[must_use]
    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Worker context.
    #[must_use]
    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &LeadKitConfig {
        &self.config
    }

    /// Site slug used in logs.
    fn site(&self) -> &str {
        self.context.adapter.slug()
    }

    /// Path of the background worker endpoint.
    #[must_use]
    pub fn background_path(&self) -> String {
        self.config.background_path(self.context.adapter.background_path())
    }

    /// Drop shared connections held by the worker context.
    ///
    /// Call [`LeadHandlers::drain`] first so in-flight runs can finish.
    pub fn shutdown(&self) {
        self.context.shutdown();
    }
}
