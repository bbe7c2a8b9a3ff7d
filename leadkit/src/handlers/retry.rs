//! Retry: re-arm a failed job and trigger the worker again.

use super::{LeadError, LeadHandlers};
use crate::id::JobId;
use crate::record::{ErrorInfo, JobStatus, RecordPatch, Stage};
use http::HeaderMap;
use tracing::{info, warn};

/// Message recorded when a retry could not trigger the worker.
pub const RETRY_ENQUEUE_FAILED: &str = "Retry enqueue failed";

/// What a successful retry did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The job was already sent; nothing changed.
    AlreadySent,
    /// The job was re-armed and the worker triggered.
    Queued,
}

impl LeadHandlers {
    /// Retry a job.
    ///
    /// Attempts are only consumed by the worker, so the limit check reflects
    /// pipeline runs that actually happened.
    ///
    /// # Errors
    ///
    /// - [`LeadError::NotFound`] if the id is unknown
    /// - [`LeadError::RetryLimit`] if the attempts are used up; the record
    ///   is marked failed
    /// - [`LeadError::Enqueue`] if the worker could not be triggered
    /// - [`LeadError::Store`] if the record could not be written
    pub async fn retry(&self, id: &JobId, headers: &HeaderMap) -> Result<RetryOutcome, LeadError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(LeadError::NotFound { id: *id })?;

        if record.status == JobStatus::Sent {
            info!(job_id = %id, "retry ignored, already sent");
            return Ok(RetryOutcome::AlreadySent);
        }

        let max_attempts = self.config.jobs.max_attempts;
        if record.attempts >= max_attempts {
            warn!(job_id = %id, attempts = record.attempts, max_attempts, "retry limit reached");
            self.store
                .fail(id, ErrorInfo::message("Retry limit reached"), record.stage)
                .await?;
            return Err(LeadError::RetryLimit { id: *id });
        }

        self.store
            .patch(
                id,
                RecordPatch::new()
                    .status(JobStatus::Queued)
                    .stage(Stage::Enqueue)
                    .clear_done_at()
                    .error(None),
            )
            .await?;

        self.enqueue(id, headers, RETRY_ENQUEUE_FAILED).await?;

        info!(job_id = %id, attempts = record.attempts, "retry queued");
        Ok(RetryOutcome::Queued)
    }
}
