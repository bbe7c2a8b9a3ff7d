//! Adaptive status polling.
//!
//! One cooperative loop: read the status, report the derived [`UiState`],
//! sleep, grow the interval. The loop stops on a terminal status or when the
//! hard deadline passes. The deadline only stops observing; the background
//! work itself carries on.

use super::ui::{is_terminal, ui_from_status, UiOptions, UiState};
use super::{ClientError, StatusSnapshot};
use crate::id::JobId;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Where status snapshots come from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Read the current status of a job.
    ///
    /// # Errors
    ///
    /// Returns error if the status cannot be read.
    async fn fetch_status(&self, id: &JobId) -> Result<StatusSnapshot, ClientError>;
}

/// Poller timing and copy.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// First sleep between reads.
    pub interval: Duration,
    /// Factor applied to the interval after each read.
    pub growth: f64,
    /// Upper bound for the interval.
    pub max_interval: Duration,
    /// Total time after which polling gives up.
    pub hard_stop: Duration,
    /// UI copy and retry limit.
    pub ui: UiOptions,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(900),
            growth: 1.15,
            max_interval: Duration::from_millis(2500),
            hard_stop: Duration::from_secs(60),
            ui: UiOptions::default(),
        }
    }
}

impl PollerConfig {
    /// Interval following `current`: grown, rounded to whole
    /// milliseconds, capped at the maximum.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        let micros = current.mul_f64(self.growth).as_micros();
        let millis = u64::try_from(micros.saturating_add(500) / 1000).unwrap_or(u64::MAX);
        let grown = Duration::from_millis(millis);
        grown.min(self.max_interval)
    }
}

/// Poll until the job is terminal or the hard deadline passes.
///
/// `on_ui` receives every state change, along with the snapshot it was
/// derived from when there is one. Returns the terminal snapshot, or `None`
/// after emitting a retryable "still working" state on timeout.
///
/// The deadline also bounds each status read, so a source that never
/// answers cannot hold the loop past it.
pub async fn poll_status<S, F>(
    source: &S,
    id: &JobId,
    config: &PollerConfig,
    mut on_ui: F,
) -> Option<StatusSnapshot>
where
    S: StatusSource + ?Sized,
    F: FnMut(&UiState, Option<&StatusSnapshot>),
{
    let deadline = Instant::now() + config.hard_stop;
    let mut interval = config.interval.min(config.max_interval);

    on_ui(&UiState::preparing(&config.ui), None);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(job_id = %id, "status polling timed out");
            on_ui(&UiState::still_working(), None);
            return None;
        }

        match timeout(remaining, source.fetch_status(id)).await {
            Ok(Ok(snapshot)) => {
                let ui = ui_from_status(&snapshot, &config.ui);
                on_ui(&ui, Some(&snapshot));
                if is_terminal(&snapshot) {
                    return Some(snapshot);
                }
            }
            Ok(Err(e)) => {
                debug!(job_id = %id, error = %e, "status read failed, retrying");
                on_ui(&UiState::checking(), None);
            }
            Err(_) => {
                debug!(job_id = %id, "status read still pending at deadline");
                on_ui(&UiState::still_working(), None);
                return None;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(interval.min(remaining)).await;
        interval = config.next_interval(interval);
    }
}
