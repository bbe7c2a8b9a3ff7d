//! Single-file JSON record backend for local development.
//!
//! All records of a store live in one `<store name>.store.json` document,
//! mapping job id to record. Within the process, reads share a lock and
//! writes hold it exclusively. Each write lands in a temporary file that is
//! then renamed over the document, so readers in other processes see either
//! the old or the new document. Across processes, writes are still
//! last-writer-wins like every other backend.

use super::{RecordBackend, StoreError};
use crate::id::JobId;
use crate::record::JobRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::error;

/// Records persisted to a JSON file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileBackend {
    /// Backend writing `<dir>/<store name>.store.json`.
    ///
    /// Characters other than ASCII letters, digits, `-` and `_` in the store
    /// name are replaced with `_`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, store_name: &str) -> Self {
        let safe: String = store_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            path: dir.as_ref().join(format!("{safe}.store.json")),
            lock: RwLock::new(()),
        }
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }

    /// Read every record. A missing or blank file is an empty store; a
    /// document that does not parse is an error, so that the next write
    /// cannot replace records it failed to read.
    async fn read_all(&self) -> Result<HashMap<String, JobRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "unreadable store file");
            StoreError::Serialization(e)
        })
    }
}

#[async_trait]
impl RecordBackend for FileBackend {
    async fn load(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let _guard = self.lock.read().await;
        let mut all = self.read_all().await?;
        Ok(all.remove(&id.to_string()))
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut all = self.read_all().await?;
        all.insert(record.id.to_string(), record.clone());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&all)?;
        let temp = self.temp_path();
        fs::write(&temp, body).await?;
        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
