//! Processing pipeline: render a document, then send the notification.
//!
//! The pipeline is a single pass over fixed stages. It never touches the
//! record store; every transition is reported to a [`StageObserver`], which
//! is awaited before the pipeline moves on.
//!
//! ```text
//! plan -> [render_start -> render_ok | render_failed]
//!      -> [send_start -> send_ok | send_failed]
//!      -> done
//! ```
//!
//! A render failure is recoverable only when sending was requested and the
//! policy allows sending without a document; otherwise the run fails tagged
//! with the `render` stage. A send failure always fails the run, tagged with
//! the `send` stage. An observer error aborts the run untagged.

use crate::adapter::ValidatedAdapter;
use crate::config::PipelineConfig;
use crate::id::JobId;
use crate::message::MessageComposer;
use crate::record::{SendResult, Stage};
use crate::render::{DocumentRenderer, RenderRequest};
use crate::transmit::MessageTransmitter;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message used when the document is required but was not produced.
pub const MISSING_ARTIFACT: &str = "Missing document artifact for message attachment";

/// A pipeline transition and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// Run planned.
    Plan {
        /// Whether a document will be rendered.
        need_render: bool,
    },
    /// Rendering started.
    RenderStart,
    /// Rendering succeeded.
    RenderOk {
        /// Size of the document.
        bytes: usize,
    },
    /// Rendering failed.
    RenderFailed {
        /// Failure message.
        error: String,
    },
    /// Sending started.
    SendStart,
    /// Sending succeeded.
    SendOk {
        /// Message id of the delivered message.
        message_id: String,
        /// Whether the document was attached.
        has_artifact: bool,
        /// Full delivery result.
        result: SendResult,
    },
    /// Sending failed.
    SendFailed {
        /// Failure message.
        error: String,
    },
    /// Run finished without a fatal error.
    Done {
        /// Whether a document was produced.
        has_artifact: bool,
    },
}

impl StageEvent {
    /// Stage recorded for this event.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Plan { .. } => Stage::Plan,
            Self::RenderStart => Stage::RenderStart,
            Self::RenderOk { .. } => Stage::RenderOk,
            Self::RenderFailed { .. } => Stage::RenderFailed,
            Self::SendStart => Stage::SendStart,
            Self::SendOk { .. } => Stage::SendOk,
            Self::SendFailed { .. } => Stage::SendFailed,
            Self::Done { .. } => Stage::Done,
        }
    }
}

/// Receives every stage transition.
#[async_trait]
pub trait StageObserver: Send + Sync {
    /// Handle one transition.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline with [`PipelineError::Observer`].
    async fn on_stage(&self, event: &StageEvent) -> anyhow::Result<()>;
}

/// Fatal pipeline failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rendering failed and the run could not continue.
    #[error("{message}")]
    Render {
        /// Failure message.
        message: String,
    },
    /// Sending failed.
    #[error("{message}")]
    Send {
        /// Failure message.
        message: String,
    },
    /// The observer failed while handling a transition.
    #[error("stage observer failed at {stage}: {source}")]
    Observer {
        /// Stage being reported.
        stage: Stage,
        /// Observer error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PipelineError {
    /// Stage tag of the failure, if it has one.
    ///
    /// Observer failures are not tagged; callers fall back to the last stage
    /// they observed.
    #[must_use]
    pub const fn tagged_stage(&self) -> Option<Stage> {
        match self {
            Self::Render { .. } => Some(Stage::Render),
            Self::Send { .. } => Some(Stage::Send),
            Self::Observer { .. } => None,
        }
    }
}

/// Collaborators the pipeline runs with.
///
/// Owns the long-lived renderer and transmitter; [`WorkerContext::shutdown`]
/// drops their connections.
#[derive(Clone)]
pub struct WorkerContext {
    /// Site adapter.
    pub adapter: ValidatedAdapter,
    /// Document renderer.
    pub renderer: Arc<dyn DocumentRenderer>,
    /// Message transmitter.
    pub transmitter: Arc<dyn MessageTransmitter>,
    /// Message composer.
    pub composer: MessageComposer,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("adapter", &self.adapter)
            .field("composer", &self.composer)
            .finish_non_exhaustive()
    }
}

impl WorkerContext {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        adapter: ValidatedAdapter,
        renderer: Arc<dyn DocumentRenderer>,
        transmitter: Arc<dyn MessageTransmitter>,
        composer: MessageComposer,
    ) -> Self {
        Self {
            adapter,
            renderer,
            transmitter,
            composer,
        }
    }

    /// Drop shared connections; later runs reconnect lazily.
    pub fn shutdown(&self) {
        self.renderer.shutdown();
        self.transmitter.shutdown();
        debug!(site = %self.adapter.slug(), "worker context shut down");
    }
}

/// Per-run options.
#[derive(Clone, Copy, Default)]
pub struct PipelineOptions<'a> {
    /// Render a document.
    pub need_render: bool,
    /// Send the notification.
    pub also_send: bool,
    /// Job id; a fresh one is generated when absent.
    pub correlation_id: Option<JobId>,
    /// Transition observer.
    pub observer: Option<&'a dyn StageObserver>,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Job id the run used.
    pub correlation_id: JobId,
    /// Rendered document, if any.
    pub artifact: Option<Bytes>,
    /// Delivery result, if a message was sent.
    pub send_result: Option<SendResult>,
}

async fn emit(
    observer: Option<&dyn StageObserver>,
    event: StageEvent,
) -> Result<(), PipelineError> {
    let Some(observer) = observer else {
        return Ok(());
    };
    observer.on_stage(&event).await.map_err(|e| {
        warn!(stage = %event.stage(), error = %e, "stage observer failed");
        PipelineError::Observer {
            stage: event.stage(),
            source: e.into(),
        }
    })
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

async fn render_document(
    ctx: &WorkerContext,
    payload: &Value,
    correlation_id: JobId,
) -> Result<Bytes, String> {
    let model = ctx
        .adapter
        .build_document_model(payload)
        .map_err(|e| e.to_string())?;
    ctx.renderer
        .render(RenderRequest {
            template_path: ctx.adapter.template_path(),
            model: &model,
            correlation_id,
        })
        .await
        .map_err(|e| e.to_string())
}

async fn send_message(
    ctx: &WorkerContext,
    policy: PipelineConfig,
    payload: &Value,
    artifact: Option<&Bytes>,
    correlation_id: JobId,
) -> Result<SendResult, String> {
    if policy.require_artifact && artifact.is_none() {
        return Err(MISSING_ARTIFACT.to_string());
    }
    let message = ctx
        .composer
        .compose(&ctx.adapter, payload, artifact, correlation_id)
        .await
        .map_err(|e| e.to_string())?;
    ctx.transmitter.send(message).await.map_err(|e| e.to_string())
}

/// Run the pipeline once over a validated payload.
///
/// # Errors
///
/// Returns a [`PipelineError`] tagged with the failing stage, or
/// [`PipelineError::Observer`] if the observer fails.
pub async fn run_pipeline(
    ctx: &WorkerContext,
    payload: &Value,
    policy: PipelineConfig,
    options: PipelineOptions<'_>,
) -> Result<PipelineOutput, PipelineError> {
    let correlation_id = options.correlation_id.unwrap_or_default();
    let observer = options.observer;

    emit(observer, StageEvent::Plan { need_render: options.need_render }).await?;

    let mut artifact = None;
    if options.need_render {
        emit(observer, StageEvent::RenderStart).await?;
        match render_document(ctx, payload, correlation_id).await {
            Ok(bytes) => {
                emit(observer, StageEvent::RenderOk { bytes: bytes.len() }).await?;
                artifact = Some(bytes);
            }
            Err(message) => {
                let message = non_empty(message, "Document rendering failed");
                emit(observer, StageEvent::RenderFailed { error: message.clone() }).await?;
                if !(options.also_send && policy.send_without_artifact) {
                    return Err(PipelineError::Render { message });
                }
                debug!(job_id = %correlation_id, "continuing without document");
            }
        }
    }

    let mut send_result = None;
    if options.also_send {
        emit(observer, StageEvent::SendStart).await?;
        match send_message(ctx, policy, payload, artifact.as_ref(), correlation_id).await {
            Ok(result) => {
                emit(
                    observer,
                    StageEvent::SendOk {
                        message_id: result.message_id.clone(),
                        has_artifact: artifact.is_some(),
                        result: result.clone(),
                    },
                )
                .await?;
                send_result = Some(result);
            }
            Err(message) => {
                let message = non_empty(message, "Message sending failed");
                emit(observer, StageEvent::SendFailed { error: message.clone() }).await?;
                return Err(PipelineError::Send { message });
            }
        }
    }

    emit(observer, StageEvent::Done { has_artifact: artifact.is_some() }).await?;

    Ok(PipelineOutput {
        correlation_id,
        artifact,
        send_result,
    })
}
