//! LeadKit: durable form intake with background processing.
//!
//! A submission is validated, stored as a job record and handed to a
//! background worker. The worker renders a document from the payload,
//! sends a message with the document attached, and records every stage so
//! clients can poll progress and retry failures.
//!
//! - [`handlers`]: intake, worker, status and retry operations
//! - [`router`]: axum routes over the handlers
//! - [`pipeline`]: the render-then-send run with stage events
//! - [`store`]: job records over pluggable backends
//! - [`client`]: submit, poll and retry from the client side

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod client;
pub mod config;
pub mod handlers;
pub mod id;
pub mod message;
pub mod pipeline;
pub mod record;
pub mod render;
pub mod resource;
pub mod router;
pub mod store;
pub mod transmit;
pub mod trigger;

pub use adapter::{SiteAdapter, ValidatedAdapter};
pub use config::LeadKitConfig;
pub use handlers::{LeadError, LeadHandlers};
pub use id::JobId;
pub use pipeline::{run_pipeline, WorkerContext};
pub use record::{JobRecord, JobStatus, Stage};
pub use router::router;
pub use store::RecordStore;

use std::time::Duration;

/// Whole milliseconds of a duration, saturating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
