//! Record store: one mutable [`JobRecord`] per job id.
//!
//! The store sits on top of a [`RecordBackend`] that only knows how to load
//! and save whole records. Everything else (merging, timestamping, status
//! transition checks) lives in [`RecordStore`] so that backends stay small.
//!
//! There is no locking and no compare-and-swap: concurrent patches to the
//! same id are last-writer-wins. Each id is normally driven by a single
//! worker invocation and the record is read-mostly for display.
//!
//! # Backends
//!
//! - [`MemoryBackend`]: process-local map, used in tests and single-process
//!   deployments
//! - [`FileBackend`]: one JSON document per store name, for local development
//! - `RedisBackend` (feature `redis`): one key per job under a namespace

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis_backend;

pub use file::FileBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;

use crate::id::JobId;
use crate::record::{ErrorInfo, JobRecord, JobStatus, RecordPatch, Stage};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Errors raised by the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or failed the operation.
    #[error("record backend error: {0}")]
    Backend(String),
    /// A stored record could not be (de)serialized.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Local file I/O failed.
    #[error("record file error: {0}")]
    Io(#[from] std::io::Error),
    /// The patch would move the record along a forbidden status edge.
    #[error("invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        /// Job id.
        id: JobId,
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },
}

/// Persistence of whole records keyed by job id.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Load a record, `None` if absent.
    async fn load(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Store a record, replacing any previous value.
    async fn save(&self, record: &JobRecord) -> Result<(), StoreError>;
}

/// Read-modify-write access to job records.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    name: String,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("name", &self.name)
            .field("backend", &"RecordBackend")
            .finish()
    }
}

impl RecordStore {
    /// Create a store over the given backend.
    pub fn new(name: impl Into<String>, backend: Arc<dyn RecordBackend>) -> Self {
        Self {
            backend,
            name: name.into(),
        }
    }

    /// In-memory store, mostly for tests.
    #[must_use]
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(MemoryBackend::new()))
    }

    /// Store name (namespace).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch a record.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or the stored value is corrupt.
    pub async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        self.backend.load(id).await
    }

    /// Overwrite a record as-is.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn set(&self, record: &JobRecord) -> Result<(), StoreError> {
        debug!(store = %self.name, job_id = %record.id, status = %record.status, "set record");
        self.backend.save(record).await
    }

    /// Merge `patch` onto the stored record and persist the result.
    ///
    /// Absent records start from a skeleton with `created_at = now`. The id
    /// and correlation id are forced to `id` and `updated_at` is stamped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the patch changes the
    /// status along an edge the transition table forbids, or a backend error.
    pub async fn patch(&self, id: &JobId, patch: RecordPatch) -> Result<JobRecord, StoreError> {
        let now = Utc::now();
        let existing = self.backend.load(id).await?;
        let fresh = existing.is_none();
        let mut record = existing.unwrap_or_else(|| JobRecord::skeleton(*id, now));

        if let Some(next) = patch.status {
            if !fresh && !record.status.can_transition_to(next) {
                warn!(
                    store = %self.name,
                    job_id = %id,
                    from = %record.status,
                    to = %next,
                    "rejected status transition"
                );
                return Err(StoreError::InvalidTransition {
                    id: *id,
                    from: record.status,
                    to: next,
                });
            }
        }

        if let Some(next) = patch.stage {
            if !fresh && !record.stage.may_precede(next) {
                debug!(
                    store = %self.name,
                    job_id = %id,
                    from = %record.stage,
                    to = %next,
                    "unexpected stage ordering"
                );
            }
        }

        patch.apply_to(&mut record);
        record.id = *id;
        record.correlation_id = *id;
        record.updated_at = now;

        self.backend.save(&record).await?;
        Ok(record)
    }

    /// Mark a record failed at `stage` with the given error.
    ///
    /// # Errors
    ///
    /// Same as [`RecordStore::patch`].
    pub async fn fail(
        &self,
        id: &JobId,
        error: ErrorInfo,
        stage: Stage,
    ) -> Result<JobRecord, StoreError> {
        let patch = RecordPatch::new()
            .status(JobStatus::Failed)
            .stage(stage)
            .error(Some(error))
            .done_at(Utc::now());
        self.patch(id, patch).await
    }
}
