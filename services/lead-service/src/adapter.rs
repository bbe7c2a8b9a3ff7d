//! Contact-form site adapter.
//!
//! Accepts `{name, email, company?, phone?, message}` submissions, renders the
//! notification bodies with askama and hands the lead to the document
//! template as `{site, lead, submittedAt}`.

use askama::Template;
use chrono::Utc;
use leadkit::adapter::{validate_typed, AdapterError, FieldIssue, SiteAdapter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

/// Default document template, relative to the site origin.
pub const DEFAULT_TEMPLATE_PATH: &str = "/pdf/lead.html";

/// A contact-form submission.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactLead {
    /// Contact name.
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    /// Contact email.
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    /// Company name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 200, message = "Company is too long"))]
    pub company: Option<String>,
    /// Phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 50, message = "Phone is too long"))]
    pub phone: Option<String>,
    /// Free-form message.
    #[validate(length(min = 1, max = 5000, message = "Message is required"))]
    pub message: String,
}

#[derive(Template)]
#[template(path = "lead_message.html")]
struct HtmlMessage<'a> {
    site: &'a str,
    lead: &'a ContactLead,
}

#[derive(Template)]
#[template(path = "lead_message.txt")]
struct TextMessage<'a> {
    site: &'a str,
    lead: &'a ContactLead,
}

/// Adapter for a plain contact form.
#[derive(Debug, Clone)]
pub struct ContactFormAdapter {
    slug: String,
    template_path: String,
    background_path: Option<String>,
}

impl ContactFormAdapter {
    /// Adapter for `slug` using [`DEFAULT_TEMPLATE_PATH`].
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            template_path: DEFAULT_TEMPLATE_PATH.to_string(),
            background_path: None,
        }
    }

    /// Use another document template.
    #[must_use]
    pub fn with_template_path(mut self, path: impl Into<String>) -> Self {
        self.template_path = path.into();
        self
    }

    /// Serve the background worker at another path.
    #[must_use]
    pub fn with_background_path(mut self, path: impl Into<String>) -> Self {
        self.background_path = Some(path.into());
        self
    }

    fn lead(payload: &Value) -> Result<ContactLead, AdapterError> {
        serde_json::from_value(payload.clone()).map_err(|e| AdapterError::Model(e.to_string()))
    }
}

impl SiteAdapter for ContactFormAdapter {
    fn site_slug(&self) -> &str {
        &self.slug
    }

    fn template_path(&self) -> &str {
        &self.template_path
    }

    fn background_path(&self) -> Option<&str> {
        self.background_path.as_deref()
    }

    fn validate(&self, payload: &Value) -> Result<Value, Vec<FieldIssue>> {
        validate_typed::<ContactLead>(payload)
    }

    fn build_document_model(&self, payload: &Value) -> Result<Value, AdapterError> {
        let lead = Self::lead(payload)?;
        Ok(json!({
            "site": self.slug,
            "lead": lead,
            "submittedAt": Utc::now().to_rfc3339(),
        }))
    }

    fn render_message_html(&self, payload: &Value) -> Result<String, AdapterError> {
        let lead = Self::lead(payload)?;
        HtmlMessage {
            site: &self.slug,
            lead: &lead,
        }
        .render()
        .map_err(|e| AdapterError::Content(e.to_string()))
    }

    fn render_message_text(&self, payload: &Value) -> Result<String, AdapterError> {
        let lead = Self::lead(payload)?;
        TextMessage {
            site: &self.slug,
            lead: &lead,
        }
        .render()
        .map_err(|e| AdapterError::Content(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Value {
        json!({
            "name": "Ada Lovelace",
            "email": "ada@example.com",
            "company": "Analytical <Engines>",
            "message": "Please call me back.",
        })
    }

    #[test]
    fn test_validate_strips_unknown_fields() {
        let adapter = ContactFormAdapter::new("acme");
        let mut input = payload();
        input["honeypot"] = json!("spam");

        let data = adapter.validate(&input).unwrap();

        assert!(data.get("honeypot").is_none());
        assert!(data.get("phone").is_none());
        assert_eq!(data["company"], "Analytical <Engines>");
    }

    #[test]
    fn test_validate_reports_every_field() {
        let adapter = ContactFormAdapter::new("acme");
        let issues = adapter
            .validate(&json!({ "name": "", "email": "nope", "message": "" }))
            .unwrap_err();
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["email", "message", "name"]);
    }

    #[test]
    fn test_html_is_escaped() {
        let html = ContactFormAdapter::new("acme").render_message_html(&payload()).unwrap();
        assert!(html.contains("Ada Lovelace"));
        assert!(html.contains("&#60;Engines&#62;") || html.contains("&lt;Engines&gt;"));
        assert!(!html.contains("<Engines>"));
    }

    #[test]
    fn test_text_body() {
        let text = ContactFormAdapter::new("acme").render_message_text(&payload()).unwrap();
        assert!(text.contains("Name: Ada Lovelace"));
        assert!(text.contains("Company: Analytical <Engines>"));
        assert!(!text.contains("Phone:"));
    }

    #[test]
    fn test_document_model() {
        let model = ContactFormAdapter::new("acme").build_document_model(&payload()).unwrap();
        assert_eq!(model["site"], "acme");
        assert_eq!(model["lead"]["email"], "ada@example.com");
        assert!(model["submittedAt"].is_string());
    }
}
