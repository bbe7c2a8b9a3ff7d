//! Composition of the notification message sent for each lead.

use crate::adapter::ValidatedAdapter;
use crate::config::MessageConfig;
use crate::id::JobId;
use crate::transmit::{Attachment, OutboundMessage, TransmitError};
use bytes::Bytes;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// Content id of the inline logo, referenced from HTML as `cid:logo@lead`.
pub const LOGO_CONTENT_ID: &str = "logo@lead";

/// Payload fields tried, in order, for the business name in the subject.
const BUSINESS_NAME_FIELDS: [&str; 5] =
    ["businessName", "companyName", "business", "company", "name"];

/// Payload fields tried, in order, for the reply-to address.
const REPLY_TO_FIELDS: [&str; 2] = ["email", "contactEmail"];

/// Split a `,`/`;` separated address list, dropping blanks.
#[must_use]
pub fn split_addresses(list: &str) -> Vec<String> {
    list.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Redact an address for logs: `ada@example.com` becomes `a***@example.com`.
#[must_use]
pub fn redact_address(address: &str) -> String {
    let address = address.trim();
    match address.find('@') {
        Some(at) if at > 1 => {
            let first: String = address.chars().take(1).collect();
            format!("{first}***{}", &address[at..])
        }
        _ if address.is_empty() => String::new(),
        _ => "***".to_string(),
    }
}

/// Domain part of an address, if it looks like a real domain.
#[must_use]
pub fn address_domain(address: &str) -> Option<&str> {
    let address = address.trim();
    let at = address.rfind('@')?;
    let domain = address[at + 1..].trim();
    domain.contains('.').then_some(domain)
}

/// Message id for a job: `<{slug}-{id}@{sender domain or "local"}>`.
#[must_use]
pub fn message_id(slug: &str, correlation_id: &JobId, from: &str) -> String {
    let slug = match slug.trim() {
        "" => "lead",
        s => s,
    };
    let domain = address_domain(from).unwrap_or("local");
    format!("<{slug}-{correlation_id}@{domain}>")
}

fn first_text<'a>(payload: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| payload.get(field).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Business name shown in the subject line.
#[must_use]
pub fn business_name(payload: &Value) -> Option<&str> {
    first_text(payload, &BUSINESS_NAME_FIELDS)
}

/// Reply-to address taken from the submission.
#[must_use]
pub fn reply_to(payload: &Value) -> Option<&str> {
    first_text(payload, &REPLY_TO_FIELDS)
}

/// Builds [`OutboundMessage`]s from configuration and adapter content.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    config: MessageConfig,
}

impl MessageComposer {
    /// Create a composer.
    #[must_use]
    pub const fn new(config: MessageConfig) -> Self {
        Self { config }
    }

    /// Subject line: the fixed subject, else `{prefix} - {business}` or
    /// `{prefix} Lead`. The prefix defaults to the upper-cased slug.
    #[must_use]
    pub fn subject(&self, slug: &str, payload: &Value) -> String {
        if let Some(fixed) = non_blank(self.config.subject.as_deref()) {
            return fixed.to_string();
        }
        let prefix = non_blank(self.config.subject_prefix.as_deref()).map_or_else(
            || match slug.trim().to_uppercase() {
                s if s.is_empty() => "Lead".to_string(),
                s => s,
            },
            str::to_string,
        );
        business_name(payload).map_or_else(
            || format!("{prefix} Lead"),
            |name| format!("{prefix} - {name}"),
        )
    }

    /// Attachment file name for the rendered document.
    #[must_use]
    pub fn attachment_filename(&self, slug: &str) -> String {
        non_blank(self.config.attachment_filename.as_deref()).map_or_else(
            || {
                let slug = match slug.trim() {
                    "" => "lead",
                    s => s,
                };
                format!("{slug}-lead.pdf")
            },
            str::to_string,
        )
    }

    fn logo_candidates(&self) -> Vec<PathBuf> {
        self.config.logo_path.as_ref().map_or_else(
            || vec![PathBuf::from("public/logo.png")],
            |path| vec![path.clone()],
        )
    }

    async fn read_logo(&self) -> Option<Bytes> {
        if !self.config.inline_logo {
            return None;
        }
        for path in self.logo_candidates() {
            match tokio::fs::read(&path).await {
                Ok(bytes) if !bytes.is_empty() => return Some(Bytes::from(bytes)),
                Ok(_) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "logo not readable"),
            }
        }
        None
    }

    /// Compose the message for one lead.
    ///
    /// # Errors
    ///
    /// Returns error if no recipient or sender is configured, or if the
    /// adapter cannot render the message content.
    pub async fn compose(
        &self,
        adapter: &ValidatedAdapter,
        payload: &Value,
        artifact: Option<&Bytes>,
        correlation_id: JobId,
    ) -> Result<OutboundMessage, TransmitError> {
        let to = self.config.to.as_deref().map(split_addresses).unwrap_or_default();
        if to.is_empty() {
            return Err(TransmitError::MissingRecipients);
        }
        let from = non_blank(self.config.from.as_deref())
            .ok_or(TransmitError::MissingSender)?
            .to_string();

        let slug = adapter.slug();
        let html = adapter
            .render_message_html(payload)
            .map_err(|e| TransmitError::Content(e.to_string()))?;
        let text = adapter
            .render_message_text(payload)
            .map_err(|e| TransmitError::Content(e.to_string()))?;

        let mut attachments = Vec::new();
        if let Some(logo) = self.read_logo().await {
            attachments.push(Attachment::inline(LOGO_CONTENT_ID, "image/png", logo));
        }
        if let Some(document) = artifact {
            attachments.push(Attachment::file(
                self.attachment_filename(slug),
                "application/pdf",
                document.clone(),
            ));
        }

        Ok(OutboundMessage {
            message_id: message_id(slug, &correlation_id, &from),
            subject: self.subject(slug, payload),
            reply_to: reply_to(payload).map(str::to_string),
            text: text.trim().to_string(),
            html: Some(html.trim().to_string()).filter(|h| !h.is_empty()),
            from,
            to,
            correlation_id,
            attachments,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
