//! Lazily initialised, shared resource handles.
//!
//! Long-lived connections (the rendering engine's HTTP client, the SMTP
//! transport) are created on first use and reused by every later call. When
//! several callers race on an empty handle, exactly one runs the initialiser
//! and the rest wait for its result. A failed initialisation leaves the
//! handle empty so the next caller tries again.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Single-flight, resettable holder for a shared resource.
pub struct LazyResource<T> {
    name: &'static str,
    cell: RwLock<Arc<OnceCell<Arc<T>>>>,
}

impl<T> std::fmt::Debug for LazyResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyResource")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl<T> LazyResource<T> {
    /// Create an empty handle.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the resource has been created.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.read().initialized()
    }

    /// Get the resource, creating it with `init` if needed.
    ///
    /// # Errors
    ///
    /// Returns the initialiser's error; the handle stays empty in that case.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Clone the cell out so the lock is not held across the await.
        let cell = Arc::clone(&self.cell.read());
        let value = cell
            .get_or_try_init(|| async move {
                debug!(resource = self.name, "initializing shared resource");
                init().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(value))
    }

    /// Drop the current resource so the next caller re-creates it.
    ///
    /// Callers already holding an `Arc<T>` keep using the old value.
    pub fn reset(&self) -> Option<Arc<T>> {
        let previous = std::mem::replace(&mut *self.cell.write(), Arc::new(OnceCell::new()));
        let value = previous.get().cloned();
        if value.is_some() {
            debug!(resource = self.name, "reset shared resource");
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_initialization() {
        let resource = Arc::new(LazyResource::<usize>::new("counter"));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let resource = Arc::clone(&resource);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                resource
                    .get_or_try_init(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(42)
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(*task.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initialization_is_retried() {
        let resource = LazyResource::<u8>::new("flaky");

        let first = resource
            .get_or_try_init(|| async { Err::<u8, _>("down") })
            .await;
        assert_eq!(first.unwrap_err(), "down");
        assert!(!resource.is_initialized());

        let second = resource
            .get_or_try_init(|| async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(*second, 7);
    }

    #[tokio::test]
    async fn test_reset_forces_reinitialization() {
        let resource = LazyResource::<u8>::new("conn");
        resource
            .get_or_try_init(|| async { Ok::<_, ()>(1) })
            .await
            .unwrap();

        let previous = resource.reset();
        assert_eq!(previous.as_deref(), Some(&1));
        assert!(!resource.is_initialized());

        let fresh = resource
            .get_or_try_init(|| async { Ok::<_, ()>(2) })
            .await
            .unwrap();
        assert_eq!(*fresh, 2);
    }
}
