//! Status: read-only projection of a job record for clients.

use super::{LeadError, LeadHandlers};
use crate::id::JobId;
use crate::record::{ErrorInfo, JobRecord, JobStatus, SendResult, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error as shown to clients: the message only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicError {
    /// Human-readable message.
    pub message: String,
}

impl PublicError {
    fn from_info(info: &ErrorInfo, fallback: &str) -> Self {
        let message = info.message.trim();
        Self {
            message: if message.is_empty() {
                fallback.to_string()
            } else {
                message.to_string()
            },
        }
    }
}

/// Client-facing view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    /// Job id.
    pub id: JobId,
    /// Correlation id (same as `id`).
    pub correlation_id: JobId,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Latest stage.
    pub stage: Stage,
    /// Pipeline runs so far.
    pub attempts: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
    /// Start of the latest run.
    pub started_at: Option<DateTime<Utc>>,
    /// End of the latest run.
    pub done_at: Option<DateTime<Utc>>,
    /// Fatal error of the latest run.
    pub error: Option<PublicError>,
    /// Rendering error of the latest run.
    pub render_error: Option<PublicError>,
    /// Delivery result.
    pub result: Option<SendResult>,
}

impl From<&JobRecord> for StatusView {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            correlation_id: record.correlation_id,
            status: record.status,
            stage: record.stage,
            attempts: record.attempts,
            created_at: record.created_at,
            updated_at: record.updated_at,
            started_at: record.started_at,
            done_at: record.done_at,
            error: record.error.as_ref().map(|e| PublicError::from_info(e, "Failed")),
            render_error: record
                .render_error
                .as_ref()
                .map(|e| PublicError::from_info(e, "Document rendering failed")),
            result: record.result.clone(),
        }
    }
}

impl LeadHandlers {
    /// Current status of a job.
    ///
    /// # Errors
    ///
    /// [`LeadError::NotFound`] if the id is unknown, or a store error.
    pub async fn status(&self, id: &JobId) -> Result<StatusView, LeadError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(LeadError::NotFound { id: *id })?;
        Ok(StatusView::from(&record))
    }
}
