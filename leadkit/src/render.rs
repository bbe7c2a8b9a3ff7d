//! Document rendering.
//!
//! The pipeline hands a template reference and a data model to a
//! [`DocumentRenderer`] and gets PDF bytes back. [`HttpDocumentRenderer`]
//! talks to an HTML-to-PDF rendering engine over HTTP; the engine loads the
//! site's template page, injects the model and prints it.

use crate::id::JobId;
use crate::resource::LazyResource;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Errors raised while rendering a document.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// No site origin to resolve the template against.
    #[error("Missing site URL for document rendering")]
    MissingOrigin,
    /// The adapter supplied a blank template path.
    #[error("Missing template path")]
    MissingTemplate,
    /// No rendering engine endpoint configured.
    #[error("Missing render endpoint")]
    MissingEndpoint,
    /// The engine failed or could not be reached.
    #[error("{message} ({correlation_id})")]
    Engine {
        /// Failure description.
        message: String,
        /// Job the render was for.
        correlation_id: JobId,
    },
}

/// What to render.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// Template path as supplied by the site adapter.
    pub template_path: &'a str,
    /// Data model injected into the template.
    pub model: &'a Value,
    /// Job the document belongs to.
    pub correlation_id: JobId,
}

/// Produces document bytes from a template and a model.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render one document.
    ///
    /// # Errors
    ///
    /// Returns error if the document cannot be produced.
    async fn render(&self, request: RenderRequest<'_>) -> Result<Bytes, RenderError>;

    /// Release long-lived connections; the next render reconnects.
    fn shutdown(&self) {}
}

/// Page margin applied on every side.
pub const PAGE_MARGIN: &str = "14mm";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EngineRequest<'a> {
    url: &'a str,
    model: &'a Value,
    format: &'static str,
    print_background: bool,
    prefer_css_page_size: bool,
    margin: EngineMargin,
}

#[derive(Debug, Serialize)]
struct EngineMargin {
    top: &'static str,
    right: &'static str,
    bottom: &'static str,
    left: &'static str,
}

impl Default for EngineMargin {
    fn default() -> Self {
        Self {
            top: PAGE_MARGIN,
            right: PAGE_MARGIN,
            bottom: PAGE_MARGIN,
            left: PAGE_MARGIN,
        }
    }
}

/// Renderer backed by an HTTP rendering engine.
///
/// The HTTP client is created on first use and kept until
/// [`DocumentRenderer::shutdown`].
#[derive(Debug)]
pub struct HttpDocumentRenderer {
    endpoint: Option<String>,
    site_origin: Option<String>,
    timeout: Duration,
    client: LazyResource<reqwest::Client>,
}

impl HttpDocumentRenderer {
    /// Create a renderer.
    #[must_use]
    pub fn new(endpoint: Option<String>, site_origin: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            site_origin,
            timeout,
            client: LazyResource::new("render-client"),
        }
    }

    /// Absolute URL of a template page.
    ///
    /// Leading slashes and a `public/` prefix are dropped from the template
    /// path, matching how static sites publish their `public/` directory.
    ///
    /// # Errors
    ///
    /// Returns error if the origin or the template path is blank.
    pub fn template_url(origin: &str, template_path: &str) -> Result<String, RenderError> {
        let origin = origin.trim().trim_end_matches('/');
        if origin.is_empty() {
            return Err(RenderError::MissingOrigin);
        }
        let mut template = template_path.trim().trim_start_matches('/');
        while let Some(rest) = template.strip_prefix("public/") {
            template = rest.trim_start_matches('/');
        }
        if template.is_empty() {
            return Err(RenderError::MissingTemplate);
        }
        Ok(format!("{origin}/{template}"))
    }

    async fn client(&self) -> Result<std::sync::Arc<reqwest::Client>, reqwest::Error> {
        let timeout = self.timeout;
        self.client
            .get_or_try_init(|| async move { reqwest::Client::builder().timeout(timeout).build() })
            .await
    }

    async fn request_pdf(&self, endpoint: &str, url: &str, model: &Value) -> Result<Bytes, String> {
        let client = self.client().await.map_err(|e| e.to_string())?;
        let body = EngineRequest {
            url,
            model,
            format: "A4",
            print_background: true,
            prefer_css_page_size: true,
            margin: EngineMargin::default(),
        };
        let response = client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Document rendering timed out after {}ms", self.timeout.as_millis())
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Rendering engine returned {status}"));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err("Rendering engine returned an empty document".to_string());
        }
        Ok(bytes)
    }
}

#[async_trait]
impl DocumentRenderer for HttpDocumentRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Bytes, RenderError> {
        let origin = self.site_origin.as_deref().ok_or(RenderError::MissingOrigin)?;
        let url = Self::template_url(origin, request.template_path)?;
        let endpoint = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(RenderError::MissingEndpoint)?;

        let started = Instant::now();
        info!(
            job_id = %request.correlation_id,
            template_url = %url,
            timeout_ms = crate::millis(self.timeout),
            "render start"
        );

        match self.request_pdf(endpoint, &url, request.model).await {
            Ok(bytes) => {
                info!(
                    job_id = %request.correlation_id,
                    bytes = bytes.len(),
                    dur_ms = crate::millis(started.elapsed()),
                    "render ok"
                );
                Ok(bytes)
            }
            Err(message) => {
                error!(job_id = %request.correlation_id, error = %message, "render failed");
                Err(RenderError::Engine {
                    message,
                    correlation_id: request.correlation_id,
                })
            }
        }
    }

    fn shutdown(&self) {
        self.client.reset();
    }
}
