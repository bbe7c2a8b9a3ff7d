//! Process-local record backend.

use super::{RecordBackend, StoreError};
use crate::id::JobId;
use crate::record::JobRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Records kept in a map for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn load(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }
}
