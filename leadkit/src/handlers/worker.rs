//! Background worker: run the pipeline for a queued job.
//!
//! The worker may be invoked more than once for the same id (the trigger is
//! at-least-once). Every invocation reruns the whole pipeline and consumes
//! one attempt; only a job already `sent` is refused.

use super::{LeadError, LeadHandlers};
use crate::id::JobId;
use crate::pipeline::{run_pipeline, PipelineOptions, StageEvent, StageObserver};
use crate::record::{ErrorInfo, JobRecord, JobStatus, RecordPatch, Stage};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Persists every stage event onto the job record.
struct RecordingObserver {
    store: RecordStore,
    id: JobId,
    last_stage: Mutex<Option<Stage>>,
}

impl RecordingObserver {
    fn new(store: RecordStore, id: JobId) -> Self {
        Self {
            store,
            id,
            last_stage: Mutex::new(None),
        }
    }

    fn last_stage(&self) -> Option<Stage> {
        *self.last_stage.lock()
    }
}

#[async_trait]
impl StageObserver for RecordingObserver {
    async fn on_stage(&self, event: &StageEvent) -> anyhow::Result<()> {
        let stage = event.stage();
        *self.last_stage.lock() = Some(stage);

        let mut patch = RecordPatch::new().stage(stage);
        match event {
            StageEvent::RenderFailed { error } => {
                patch = patch.render_error(Some(ErrorInfo::message(error.clone())));
            }
            StageEvent::RenderOk { .. } => {
                patch = patch.render_error(None);
            }
            StageEvent::SendOk { result, .. } => {
                patch = patch.result(Some(result.clone()));
            }
            StageEvent::SendFailed { error } => {
                patch = patch.error(Some(ErrorInfo::message(error.clone())));
            }
            StageEvent::Plan { .. }
            | StageEvent::RenderStart
            | StageEvent::SendStart
            | StageEvent::Done { .. } => {}
        }

        self.store.patch(&self.id, patch).await?;
        Ok(())
    }
}

impl LeadHandlers {
    /// Load a record the worker can run: it must exist, carry a payload and
    /// not be sent yet.
    ///
    /// A record without payload is marked failed at `enqueue`.
    ///
    /// # Errors
    ///
    /// [`LeadError::NotFound`], [`LeadError::AlreadySent`] or a store error.
    pub async fn runnable(&self, id: &JobId) -> Result<(JobRecord, Value), LeadError> {
        let Some(mut record) = self.store.get(id).await? else {
            return Err(LeadError::NotFound { id: *id });
        };
        if record.status == JobStatus::Sent {
            info!(job_id = %id, "worker skipped, already sent");
            return Err(LeadError::AlreadySent { id: *id });
        }
        let Some(payload) = record.payload.take() else {
            warn!(job_id = %id, "worker found no stored payload");
            self.store
                .fail(id, ErrorInfo::message("Missing stored payload"), Stage::Enqueue)
                .await?;
            return Err(LeadError::NotFound { id: *id });
        };
        Ok((record, payload))
    }

    /// Run the pipeline for a stored job.
    ///
    /// Re-validates the stored payload, consumes one attempt, moves the
    /// record to `processing` and persists every stage. On success the
    /// record ends `sent` at `done`; on failure it ends `failed` at the
    /// failure's stage.
    ///
    /// # Errors
    ///
    /// - [`LeadError::NotFound`] if there is no record or no payload
    /// - [`LeadError::AlreadySent`] if the job was already delivered
    /// - [`LeadError::Validation`] if the stored payload no longer validates
    /// - [`LeadError::Pipeline`] if the pipeline failed
    /// - [`LeadError::Store`] if the record could not be written
    pub async fn process(&self, id: &JobId) -> Result<(), LeadError> {
        let started = Instant::now();
        info!(job_id = %id, site = %self.site(), "worker start");

        let (record, payload) = self.runnable(id).await?;

        let data = match self.context.adapter.validate(&payload) {
            Ok(data) => data,
            Err(issues) => {
                warn!(job_id = %id, issues = issues.len(), "stored payload invalid");
                self.store
                    .fail(id, ErrorInfo::message("Stored payload invalid"), Stage::Enqueue)
                    .await?;
                return Err(LeadError::Validation(issues));
            }
        };

        let attempt = record.attempts + 1;
        self.store
            .patch(
                id,
                RecordPatch::new()
                    .status(JobStatus::Processing)
                    .stage(Stage::Plan)
                    .attempts(attempt)
                    .started_at(Utc::now())
                    .clear_done_at()
                    .error(None)
                    .render_error(None)
                    .result(None),
            )
            .await?;

        let observer = RecordingObserver::new(self.store.clone(), *id);
        let options = PipelineOptions {
            need_render: self.config.pipeline.render_enabled,
            also_send: true,
            correlation_id: Some(*id),
            observer: Some(&observer),
        };

        match run_pipeline(&self.context, &data, self.config.pipeline, options).await {
            Ok(_) => {
                self.store
                    .patch(
                        id,
                        RecordPatch::new()
                            .status(JobStatus::Sent)
                            .stage(Stage::Done)
                            .done_at(Utc::now()),
                    )
                    .await?;
                info!(
                    job_id = %id,
                    attempt,
                    dur_ms = crate::millis(started.elapsed()),
                    "worker sent"
                );
                Ok(())
            }
            Err(e) => {
                let stage = e
                    .tagged_stage()
                    .or_else(|| observer.last_stage())
                    .or(Some(record.stage).filter(|s| *s != Stage::Unknown))
                    .unwrap_or(Stage::Unknown);
                let info = ErrorInfo::from_error(&e);

                if let Err(store_err) = self.store.fail(id, info.clone(), stage).await {
                    error!(job_id = %id, error = %store_err, "could not record pipeline failure");
                }
                error!(
                    job_id = %id,
                    attempt,
                    stage = %stage,
                    error = %info.message,
                    dur_ms = crate::millis(started.elapsed()),
                    "worker failed"
                );
                Err(LeadError::Pipeline {
                    id: *id,
                    message: info.message,
                    stage,
                })
            }
        }
    }

    /// Run [`LeadHandlers::process`] in a tracked background task.
    pub fn spawn_process(self: &Arc<Self>, id: JobId) {
        let handlers = Arc::clone(self);
        self.runs.spawn(async move {
            match handlers.process(&id).await {
                Ok(()) => info!(job_id = %id, "background run finished"),
                Err(e) => warn!(job_id = %id, error = %e, "background run ended with error"),
            }
        });
    }

    /// Number of background runs still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    /// Wait up to `grace` for background runs to finish.
    ///
    /// Returns `false` if runs were still in flight when the grace period
    /// ended; those are dropped with the runtime.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.runs.close();
        let pending = self.runs.len();
        if pending > 0 {
            info!(pending, "waiting for background runs");
        }
        let drained = tokio::time::timeout(grace, self.runs.wait()).await.is_ok();
        if !drained {
            warn!(pending = self.runs.len(), "background runs still in flight at shutdown");
        }
        self.runs.reopen();
        drained
    }
}
