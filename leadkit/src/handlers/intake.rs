//! Intake: accept a submission and hand it to the background worker.

use super::{LeadError, LeadHandlers};
use crate::id::JobId;
use crate::record::{ErrorInfo, JobRecord, Stage};
use crate::trigger::resolve_origin;
use http::HeaderMap;
use serde_json::Value;
use std::time::Instant;
use tracing::{error, info, warn};

/// Message recorded when the worker could not be triggered.
pub const ENQUEUE_FAILED: &str = "Background enqueue failed";

/// Message recorded when no origin is available for the worker call.
pub const MISSING_ORIGIN: &str = "Missing site URL";

impl LeadHandlers {
    /// Accept a new submission.
    ///
    /// Validates `payload`, stores a `queued` record and triggers the
    /// background worker. Returns the new job id.
    ///
    /// # Errors
    ///
    /// - [`LeadError::Validation`] if the payload is invalid; no record is
    ///   created
    /// - [`LeadError::Enqueue`] if the worker could not be triggered; the
    ///   record is marked failed at `enqueue`
    /// - [`LeadError::Store`] if the record could not be written
    pub async fn submit(&self, payload: &Value, headers: &HeaderMap) -> Result<JobId, LeadError> {
        let started = Instant::now();
        let id = JobId::new();
        info!(job_id = %id, site = %self.site(), "intake start");

        let data = self.context.adapter.validate(payload).map_err(|issues| {
            info!(job_id = %id, issues = issues.len(), "intake invalid");
            LeadError::Validation(issues)
        })?;

        self.store
            .set(&JobRecord::queued(id, self.site(), data))
            .await?;

        self.enqueue(&id, headers, ENQUEUE_FAILED).await?;

        info!(job_id = %id, dur_ms = crate::millis(started.elapsed()), "intake queued");
        Ok(id)
    }

    /// Trigger the worker for `id`, marking the record failed at `enqueue`
    /// if that is not possible.
    pub(super) async fn enqueue(
        &self,
        id: &JobId,
        headers: &HeaderMap,
        failure: &str,
    ) -> Result<(), LeadError> {
        let Some(origin) = resolve_origin(self.config.site.url.as_deref(), headers) else {
            warn!(job_id = %id, "no origin for background trigger");
            return Err(self.enqueue_failed(id, MISSING_ORIGIN).await);
        };

        if let Err(e) = self.trigger.trigger(&origin, id).await {
            error!(job_id = %id, origin = %origin, error = %e, "enqueue failed");
            return Err(self.enqueue_failed(id, failure).await);
        }
        Ok(())
    }

    async fn enqueue_failed(&self, id: &JobId, message: &str) -> LeadError {
        if let Err(e) = self
            .store
            .fail(id, ErrorInfo::message(message), Stage::Enqueue)
            .await
        {
            error!(job_id = %id, error = %e, "could not record enqueue failure");
        }
        LeadError::Enqueue {
            id: *id,
            message: message.to_string(),
        }
    }
}
