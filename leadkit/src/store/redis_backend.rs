//! Redis record backend.
//!
//! Each record is a JSON string under `<namespace>:<job id>`. The connection
//! manager is created on first use and shared afterwards.

use super::{RecordBackend, StoreError};
use crate::id::JobId;
use crate::record::JobRecord;
use crate::resource::LazyResource;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::error;

/// Records stored as JSON strings in Redis.
#[derive(Debug)]
pub struct RedisBackend {
    url: String,
    namespace: String,
    conn: LazyResource<ConnectionManager>,
}

impl RedisBackend {
    /// Backend for the given Redis URL; keys are prefixed with `namespace`.
    #[must_use]
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: namespace.into(),
            conn: LazyResource::new("redis"),
        }
    }

    fn key(&self, id: &JobId) -> String {
        format!("{}:{id}", self.namespace)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let url = self.url.clone();
        let manager = self
            .conn
            .get_or_try_init(|| async move {
                let client = redis::Client::open(url)?;
                ConnectionManager::new(client).await
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Redis connection failed");
                StoreError::Backend(format!("Redis connection failed: {e}"))
            })?;
        Ok(ConnectionManager::clone(&manager))
    }
}

#[async_trait]
impl RecordBackend for RedisBackend {
    async fn load(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(id);
        let raw: Option<String> = conn.get(&key).await.map_err(|e| {
            error!(error = %e, key = %key, "GET failed");
            StoreError::Backend(format!("Redis error: {e}"))
        })?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(&record.id);
        let body = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(&key, body).await.map_err(|e| {
            error!(error = %e, key = %key, "SET failed");
            StoreError::Backend(format!("Redis error: {e}"))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        let backend = RedisBackend::new("redis://127.0.0.1:6379", "lead-kit-acme");
        let id: JobId = "6f9619ff-8b86-d011-b42d-00c04fc964ff".parse().unwrap();
        assert_eq!(
            backend.key(&id),
            "lead-kit-acme:6f9619ff-8b86-d011-b42d-00c04fc964ff"
        );
    }
}
