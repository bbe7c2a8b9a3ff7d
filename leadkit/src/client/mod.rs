//! Client side of the lead flow: submit, poll, retry.
//!
//! [`HttpLeadClient`] talks to the routes served by [`crate::router`].
//! [`poll_status`] drives the adaptive status loop against any
//! [`StatusSource`] and reports [`UiState`] changes to a callback.

mod http_client;
mod poller;
mod ui;

pub use http_client::{HttpLeadClient, SubmitResponse};
pub use poller::{poll_status, PollerConfig, StatusSource};
pub use ui::{is_terminal, ui_from_status, UiKind, UiOptions, UiState};

use crate::handlers::{PublicError, StatusView};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status as read by a client.
///
/// Status and stage are kept as plain strings so a client keeps working
/// against a server that reports values it does not know yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusSnapshot {
    /// Lifecycle status.
    pub status: String,
    /// Latest stage.
    pub stage: String,
    /// Pipeline runs so far.
    pub attempts: u32,
    /// Fatal error of the latest run.
    pub error: Option<PublicError>,
    /// Rendering error of the latest run.
    pub render_error: Option<PublicError>,
    /// Delivery result.
    pub result: Option<serde_json::Value>,
}

impl From<StatusView> for StatusSnapshot {
    fn from(view: StatusView) -> Self {
        Self {
            status: view.status.as_str().to_string(),
            stage: view.stage.as_str().to_string(),
            attempts: view.attempts,
            error: view.error,
            render_error: view.render_error,
            result: view.result.and_then(|r| serde_json::to_value(r).ok()),
        }
    }
}

/// Error type for lead client operations.
#[derive(Debug)]
pub enum ClientError {
    /// The base URL or a route could not be turned into a URL.
    InvalidUrl(String),
    /// The request could not be sent.
    RequestFailed(String),
    /// The server answered with an unexpected status.
    ServiceError {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, if any.
        message: String,
    },
    /// The response body could not be read.
    ResponseError(String),
    /// Request timed out.
    Timeout,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::RequestFailed(msg) => write!(f, "Request failed: {msg}"),
            Self::ServiceError { status, message } => {
                write!(f, "Service error [{status}]: {message}")
            }
            Self::ResponseError(msg) => write!(f, "Response error: {msg}"),
            Self::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::ResponseError(err.to_string())
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
