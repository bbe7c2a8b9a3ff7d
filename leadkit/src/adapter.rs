//! Site adapters.
//!
//! A site adapter supplies everything site-specific about a lead form: the
//! payload schema, the data model handed to the document template, and the
//! content of the notification message. Adapters are checked once when
//! wrapped in a [`ValidatedAdapter`]; handlers never re-check them per call.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Dotted path of the offending field; empty for the payload itself.
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

impl FieldIssue {
    /// Create an issue.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by site adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// A required adapter property is missing or blank.
    #[error("adapter.{0} required")]
    MissingCapability(&'static str),
    /// The document model could not be built.
    #[error("document model failed: {0}")]
    Model(String),
    /// Message content could not be rendered.
    #[error("message content failed: {0}")]
    Content(String),
}

/// Site-specific plug-in for the lead pipeline.
pub trait SiteAdapter: Send + Sync {
    /// Short site identifier.
    fn site_slug(&self) -> &str;

    /// Path of the document template, relative to the site origin.
    fn template_path(&self) -> &str;

    /// Store name override.
    fn store_name(&self) -> Option<&str> {
        None
    }

    /// Background worker path override.
    fn background_path(&self) -> Option<&str> {
        None
    }

    /// Validate a submission and return its normalized form.
    ///
    /// # Errors
    ///
    /// Returns every field issue found.
    fn validate(&self, payload: &Value) -> Result<Value, Vec<FieldIssue>>;

    /// Build the data model handed to the document template.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be turned into a model.
    fn build_document_model(&self, payload: &Value) -> Result<Value, AdapterError>;

    /// HTML body of the notification message.
    ///
    /// # Errors
    ///
    /// Returns error if the content cannot be rendered.
    fn render_message_html(&self, payload: &Value) -> Result<String, AdapterError>;

    /// Plain-text body of the notification message.
    ///
    /// # Errors
    ///
    /// Returns error if the content cannot be rendered.
    fn render_message_text(&self, payload: &Value) -> Result<String, AdapterError>;
}

/// An adapter whose required properties have been checked.
#[derive(Clone)]
pub struct ValidatedAdapter {
    inner: Arc<dyn SiteAdapter>,
}

impl std::fmt::Debug for ValidatedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedAdapter")
            .field("site_slug", &self.inner.site_slug())
            .field("template_path", &self.inner.template_path())
            .finish()
    }
}

impl ValidatedAdapter {
    /// Check an adapter once.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::MissingCapability`] if the slug or the
    /// template path is blank.
    pub fn new(adapter: Arc<dyn SiteAdapter>) -> Result<Self, AdapterError> {
        if adapter.site_slug().trim().is_empty() {
            return Err(AdapterError::MissingCapability("siteSlug"));
        }
        if adapter.template_path().trim().is_empty() {
            return Err(AdapterError::MissingCapability("templatePath"));
        }
        Ok(Self { inner: adapter })
    }

    /// Trimmed site slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        self.inner.site_slug().trim()
    }
}

impl Deref for ValidatedAdapter {
    type Target = dyn SiteAdapter;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

/// Validate a JSON payload through a typed form.
///
/// The payload is deserialized into `T`, checked with `validator` rules and
/// serialized back, so the stored snapshot only carries known fields.
///
/// # Errors
///
/// Returns the deserialization failure or every rule violation.
pub fn validate_typed<T>(payload: &Value) -> Result<Value, Vec<FieldIssue>>
where
    T: DeserializeOwned + Serialize + Validate,
{
    let typed: T = serde_json::from_value(payload.clone()).map_err(|e| vec![serde_issue(&e)])?;
    typed.validate().map_err(|errors| issues_from(&errors))?;
    serde_json::to_value(&typed).map_err(|e| vec![FieldIssue::new("", e.to_string())])
}

fn serde_issue(err: &serde_json::Error) -> FieldIssue {
    let message = err.to_string();
    // serde reports "missing field `name`"; surface the field as the path.
    let path = message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next())
        .unwrap_or_default();
    FieldIssue::new(path, message.clone())
}

/// Flatten `validator` errors into field issues, sorted by path.
#[must_use]
pub fn issues_from(errors: &ValidationErrors) -> Vec<FieldIssue> {
    let mut issues: Vec<FieldIssue> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let path = field.to_string();
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map_or_else(|| format!("Invalid ({})", e.code), ToString::to_string);
                FieldIssue::new(path.clone(), message)
            })
        })
        .collect();
    issues.sort_by(|a, b| a.path.cmp(&b.path));
    issues
}
