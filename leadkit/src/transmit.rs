//! Message transmission.
//!
//! [`SmtpTransmitter`] delivers an [`OutboundMessage`] over SMTP with
//! `lettre`. The transport is built on first use from [`SmtpConfig`] and
//! shared by later sends until [`MessageTransmitter::shutdown`].

use crate::config::SmtpConfig;
use crate::id::JobId;
use crate::message::redact_address;
use crate::record::SendResult;
use crate::resource::LazyResource;
use async_trait::async_trait;
use bytes::Bytes;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Errors raised while composing or transmitting a message.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    /// No SMTP host configured.
    #[error("Missing SMTP host")]
    MissingHost,
    /// No recipient configured.
    #[error("Missing recipient address")]
    MissingRecipients,
    /// No sender configured.
    #[error("Missing sender address")]
    MissingSender,
    /// An address could not be parsed.
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress {
        /// Offending address.
        address: String,
        /// Parser message.
        reason: String,
    },
    /// Message content could not be produced.
    #[error("Message content failed: {0}")]
    Content(String),
    /// The transport rejected or failed the delivery.
    #[error("{message} ({correlation_id})")]
    Delivery {
        /// Failure description.
        message: String,
        /// Job the message was for.
        correlation_id: JobId,
    },
}

/// A file carried by the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name, or the content id for inline parts.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw bytes.
    pub content: Bytes,
    /// Whether the part is referenced inline (`cid:`) rather than attached.
    pub inline: bool,
}

impl Attachment {
    /// Regular attachment.
    pub fn file(name: impl Into<String>, content_type: impl Into<String>, content: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            content,
            inline: false,
        }
    }

    /// Inline part addressed by content id.
    pub fn inline(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        content: Bytes,
    ) -> Self {
        Self {
            name: content_id.into(),
            content_type: content_type.into(),
            content,
            inline: true,
        }
    }
}

/// A fully composed notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Reply-to address.
    pub reply_to: Option<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: Option<String>,
    /// `Message-ID` header value.
    pub message_id: String,
    /// Job the message is for; sent as `X-Correlation-Id`.
    pub correlation_id: JobId,
    /// Inline parts and attachments.
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// Whether a document is attached.
    #[must_use]
    pub fn has_document(&self) -> bool {
        self.attachments.iter().any(|a| !a.inline)
    }
}

/// Delivers composed messages.
#[async_trait]
pub trait MessageTransmitter: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns error if the message is rejected or cannot be delivered.
    async fn send(&self, message: OutboundMessage) -> Result<SendResult, TransmitError>;

    /// Release long-lived connections; the next send reconnects.
    fn shutdown(&self) {}
}

/// `X-Correlation-Id` message header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CorrelationHeader(String);

impl Header for CorrelationHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Correlation-Id")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransmitError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| TransmitError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn content_type(raw: &str) -> Result<ContentType, TransmitError> {
    ContentType::parse(raw)
        .map_err(|e| TransmitError::Content(format!("invalid content type {raw}: {e}")))
}

/// Build the MIME message: text/HTML alternative, wrapped in a related part
/// when inline images exist, wrapped in a mixed part carrying attachments.
fn build_message(message: &OutboundMessage) -> Result<Message, TransmitError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone())
        .message_id(Some(message.message_id.clone()))
        .header(CorrelationHeader(message.correlation_id.to_string()));
    for to in &message.to {
        builder = builder.to(mailbox(to)?);
    }
    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }

    let mut body = match &message.html {
        Some(html) => MultiPart::alternative_plain_html(message.text.clone(), html.clone()),
        None => MultiPart::alternative().singlepart(SinglePart::plain(message.text.clone())),
    };

    let (inline, files): (Vec<&Attachment>, Vec<&Attachment>) =
        message.attachments.iter().partition(|a| a.inline);

    if !inline.is_empty() {
        let mut related = MultiPart::related().multipart(body);
        for part in inline {
            related = related.singlepart(
                MailAttachment::new_inline(part.name.clone())
                    .body(part.content.to_vec(), content_type(&part.content_type)?),
            );
        }
        body = related;
    }

    let mut mixed = MultiPart::mixed().multipart(body);
    for file in files {
        mixed = mixed.singlepart(
            MailAttachment::new(file.name.clone())
                .body(file.content.to_vec(), content_type(&file.content_type)?),
        );
    }

    builder
        .multipart(mixed)
        .map_err(|e| TransmitError::Content(format!("Failed to build message: {e}")))
}

type SmtpTransport = AsyncSmtpTransport<Tokio1Executor>;

/// SMTP transmitter.
///
/// Implicit TLS is used when the configuration is secure (port 465 by
/// default), STARTTLS otherwise.
pub struct SmtpTransmitter {
    config: SmtpConfig,
    transport: LazyResource<SmtpTransport>,
}

impl std::fmt::Debug for SmtpTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransmitter")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("secure", &self.config.is_secure())
            .field("transport", &self.transport)
            .finish()
    }
}

impl SmtpTransmitter {
    /// Create a transmitter; nothing connects until the first send.
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            transport: LazyResource::new("smtp-transport"),
        }
    }

    fn build_transport(config: &SmtpConfig) -> Result<SmtpTransport, TransmitError> {
        let host = config
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(TransmitError::MissingHost)?;
        let secure = config.is_secure();
        let transport_error = |e: lettre::transport::smtp::Error| {
            TransmitError::Content(format!("SMTP setup failed: {e}"))
        };

        let mut builder = if secure {
            SmtpTransport::relay(host).map_err(transport_error)?
        } else {
            SmtpTransport::starttls_relay(host).map_err(transport_error)?
        };

        if !config.tls_reject_unauthorized {
            let params = TlsParameters::builder(host.to_string())
                .dangerous_accept_invalid_certs(true)
                .build()
                .map_err(transport_error)?;
            builder = builder.tls(if secure {
                Tls::Wrapper(params)
            } else {
                Tls::Required(params)
            });
        }

        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_millis(config.socket_timeout_ms)));

        if config.username.is_some() || config.password.is_some() {
            builder = builder.credentials(Credentials::new(
                config.username.clone().unwrap_or_default(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        info!(host = %host, port = config.port, secure, "SMTP transport configured");
        Ok(builder.build())
    }

    async fn transport(&self) -> Result<Arc<SmtpTransport>, TransmitError> {
        self.transport
            .get_or_try_init(|| async { Self::build_transport(&self.config) })
            .await
    }

    /// Upper bound for connect plus greeting.
    const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connection_timeout_ms + self.config.greeting_timeout_ms)
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<(), String> {
        let email = build_message(message).map_err(|e| e.to_string())?;
        let transport = self.transport().await.map_err(|e| e.to_string())?;

        if self.config.verify {
            let check = transport.test_connection();
            match tokio::time::timeout(self.handshake_timeout(), check).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Err("SMTP connection check failed".to_string()),
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => return Err("SMTP connection check timed out".to_string()),
            }
        }

        let budget =
            self.handshake_timeout() + Duration::from_millis(self.config.socket_timeout_ms);
        match tokio::time::timeout(budget, transport.send(email)).await {
            Ok(Ok(response)) if response.is_positive() => Ok(()),
            Ok(Ok(response)) => Err(format!("SMTP server answered {}", response.code())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("SMTP send timed out after {}ms", budget.as_millis())),
        }
    }
}

#[async_trait]
impl MessageTransmitter for SmtpTransmitter {
    async fn send(&self, message: OutboundMessage) -> Result<SendResult, TransmitError> {
        let started = Instant::now();
        info!(
            job_id = %message.correlation_id,
            to_count = message.to.len(),
            reply_to = %message.reply_to.as_deref().map(redact_address).unwrap_or_default(),
            has_document = message.has_document(),
            "send attempt"
        );

        match self.deliver(&message).await {
            Ok(()) => {
                info!(
                    job_id = %message.correlation_id,
                    message_id = %message.message_id,
                    dur_ms = crate::millis(started.elapsed()),
                    "send ok"
                );
                Ok(SendResult {
                    message_id: message.message_id,
                    accepted: message.to,
                    rejected: Vec::new(),
                })
            }
            Err(reason) => {
                error!(job_id = %message.correlation_id, error = %reason, "send failed");
                Err(TransmitError::Delivery {
                    message: reason,
                    correlation_id: message.correlation_id,
                })
            }
        }
    }

    fn shutdown(&self) {
        self.transport.reset();
    }
}
