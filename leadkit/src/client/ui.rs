//! Mapping from a status snapshot to user-facing state.

use super::StatusSnapshot;
use serde::{Deserialize, Serialize};

/// Kind of state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiKind {
    /// Nothing submitted yet.
    Idle,
    /// Work in flight.
    Progress,
    /// Delivered.
    Success,
    /// Failed or stuck.
    Error,
}

/// What the user should see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    /// Kind of state.
    pub kind: UiKind,
    /// Short headline.
    pub title: String,
    /// Longer explanation.
    pub detail: String,
    /// Whether a retry button should be offered.
    pub can_retry: bool,
}

impl UiState {
    fn new(kind: UiKind, title: &str, detail: impl Into<String>, can_retry: bool) -> Self {
        Self {
            kind,
            title: title.to_string(),
            detail: detail.into(),
            can_retry,
        }
    }

    fn progress(title: &str, detail: impl Into<String>) -> Self {
        Self::new(UiKind::Progress, title, detail, false)
    }

    /// Initial state before anything is submitted.
    #[must_use]
    pub fn idle() -> Self {
        Self::new(UiKind::Idle, "", "", false)
    }

    /// State shown right after submitting, before the first status read.
    #[must_use]
    pub fn preparing(options: &UiOptions) -> Self {
        Self::progress("Preparing…", options.working_detail.clone())
    }

    /// State shown when a status read failed transiently.
    #[must_use]
    pub fn checking() -> Self {
        Self::progress("Checking status…", "Still working. Retrying…")
    }

    /// State shown when the poller gave up waiting.
    #[must_use]
    pub fn still_working() -> Self {
        Self::new(
            UiKind::Error,
            "Still working…",
            "This is taking longer than usual. You can keep this page open, or retry.",
            true,
        )
    }
}

/// Copy and limits used by [`ui_from_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiOptions {
    /// Attempts after which retrying is no longer offered.
    pub max_attempts: u32,
    /// Detail shown while work is in flight.
    pub working_detail: String,
    /// Detail shown on success.
    pub success_detail: String,
}

impl Default for UiOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            working_detail: "Preparing and sending your request. Keep this page open.".to_string(),
            success_detail: "Your request has been delivered.".to_string(),
        }
    }
}

fn norm(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Whether the snapshot ends polling.
#[must_use]
pub fn is_terminal(snapshot: &StatusSnapshot) -> bool {
    matches!(norm(&snapshot.status).as_str(), "sent" | "success" | "failed" | "error")
}

fn failure_prefix(stage: &str) -> &'static str {
    if stage.starts_with("render") {
        "Rendering failed."
    } else if stage.starts_with("send") {
        "Sending failed."
    } else {
        "Processing failed."
    }
}

fn error_message(snapshot: &StatusSnapshot) -> Option<&str> {
    snapshot
        .error
        .as_ref()
        .map(|e| e.message.trim())
        .filter(|m| !m.is_empty())
}

/// Derive the user-facing state from a status snapshot.
#[must_use]
pub fn ui_from_status(snapshot: &StatusSnapshot, options: &UiOptions) -> UiState {
    let status = norm(&snapshot.status);
    let stage = norm(&snapshot.stage);
    let success = || {
        UiState::new(
            UiKind::Success,
            "Sent successfully",
            options.success_detail.clone(),
            false,
        )
    };

    match status.as_str() {
        "sent" | "success" => return success(),
        "failed" | "error" => {
            let message = error_message(snapshot).unwrap_or("Something failed.");
            return UiState::new(
                UiKind::Error,
                "Failed to send",
                format!("{} {message}", failure_prefix(&stage)).trim().to_string(),
                snapshot.attempts < options.max_attempts,
            );
        }
        _ => {}
    }

    if stage == "plan" || status == "queued" {
        return UiState::progress("Preparing…", options.working_detail.clone());
    }

    match stage.as_str() {
        "render_start" => {
            UiState::progress("Generating document…", options.working_detail.clone())
        }
        "render_ok" => UiState::progress("Document ready…", "Now sending it."),
        "render_failed" => {
            let message = error_message(snapshot)
                .or_else(|| {
                    snapshot
                        .render_error
                        .as_ref()
                        .map(|e| e.message.trim())
                        .filter(|m| !m.is_empty())
                })
                .unwrap_or("Document rendering failed.");
            UiState::progress(
                "Issue generating document — continuing…",
                format!(
                    "We couldn't generate the document, but we're still sending your request. \
                     {message}"
                ),
            )
        }
        "send_start" => UiState::progress("Sending…", "Sending now. Keep this page open."),
        "send_ok" | "done" => success(),
        _ => UiState::progress("Processing…", options.working_detail.clone()),
    }
}
