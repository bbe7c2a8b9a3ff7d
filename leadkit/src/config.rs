//! Configuration for the lead pipeline.
//!
//! Loaded with `figment` from `config/default.toml`, `config/local.toml` and
//! `LEADKIT_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `LEADKIT_SMTP__HOST`). Every field has a default, so an empty
//! configuration is valid; missing values that the pipeline needs at run
//! time (SMTP host, recipients) surface as pipeline errors instead.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadKitConfig {
    /// Site identity.
    #[serde(default)]
    pub site: SiteConfig,
    /// Job bookkeeping.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Pipeline policy.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Rendering engine.
    #[serde(default)]
    pub render: RenderConfig,
    /// SMTP transport.
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Outgoing message composition.
    #[serde(default)]
    pub message: MessageConfig,
    /// Record store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// HTTP route paths.
    #[serde(default)]
    pub routes: RoutesConfig,
}

/// Site identity.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Short site identifier used in store names, subjects and message ids.
    #[serde(default = "default_slug")]
    pub slug: String,
    /// Public origin of the site; overrides request headers when set.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            slug: default_slug(),
            url: None,
        }
    }
}

/// Job bookkeeping.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Pipeline runs allowed before retries are refused.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Timeout of the background trigger call.
    #[serde(default = "default_trigger_timeout_ms")]
    pub trigger_timeout_ms: u64,
    /// Path of the background worker endpoint.
    #[serde(default)]
    pub background_path: Option<String>,
    /// Store name (namespace) override.
    #[serde(default)]
    pub store_name: Option<String>,
    /// How long shutdown waits for in-flight worker runs.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            trigger_timeout_ms: default_trigger_timeout_ms(),
            background_path: None,
            store_name: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl JobsConfig {
    /// Trigger timeout as a duration.
    #[must_use]
    pub const fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger_timeout_ms)
    }

    /// Shutdown grace period as a duration.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Pipeline policy.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PipelineConfig {
    /// Whether the worker renders a document before sending.
    #[serde(default = "default_true")]
    pub render_enabled: bool,
    /// Whether a failed render may still be followed by a send.
    #[serde(default = "default_true")]
    pub send_without_artifact: bool,
    /// Whether the send stage refuses to run without a document.
    #[serde(default)]
    pub require_artifact: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_enabled: true,
            send_without_artifact: true,
            require_artifact: false,
        }
    }
}

/// Rendering engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// URL of the HTML-to-PDF rendering endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Overall render timeout.
    #[serde(default = "default_render_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_render_timeout_ms(),
        }
    }
}

impl RenderConfig {
    /// Render timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// SMTP transport.
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server host.
    #[serde(default)]
    pub host: Option<String>,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Implicit TLS; defaults to `port == 465` when unset.
    #[serde(default)]
    pub secure: Option<bool>,
    /// SMTP username (optional).
    #[serde(default)]
    pub username: Option<String>,
    /// SMTP password (optional).
    #[serde(default)]
    pub password: Option<String>,
    /// Reject invalid server certificates.
    #[serde(default = "default_true")]
    pub tls_reject_unauthorized: bool,
    /// TCP connect timeout.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Timeout waiting for the server greeting.
    #[serde(default = "default_greeting_timeout_ms")]
    pub greeting_timeout_ms: u64,
    /// Per-command socket timeout.
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    /// Check the connection before each send.
    #[serde(default)]
    pub verify: bool,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("tls_reject_unauthorized", &self.tls_reject_unauthorized)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_smtp_port(),
            secure: None,
            username: None,
            password: None,
            tls_reject_unauthorized: true,
            connection_timeout_ms: default_connection_timeout_ms(),
            greeting_timeout_ms: default_greeting_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            verify: false,
        }
    }
}

impl SmtpConfig {
    /// Whether to use implicit TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or(self.port == 465)
    }
}

/// Outgoing message composition.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageConfig {
    /// Recipients, separated by `,` or `;`.
    #[serde(default)]
    pub to: Option<String>,
    /// Sender address.
    #[serde(default)]
    pub from: Option<String>,
    /// Fixed subject; wins over the derived one.
    #[serde(default)]
    pub subject: Option<String>,
    /// Subject prefix; defaults to the upper-cased site slug.
    #[serde(default)]
    pub subject_prefix: Option<String>,
    /// Attachment file name; defaults to `{slug}-lead.pdf`.
    #[serde(default)]
    pub attachment_filename: Option<String>,
    /// Embed the site logo inline.
    #[serde(default = "default_true")]
    pub inline_logo: bool,
    /// Logo file; `public/logo.png` is tried when unset.
    #[serde(default)]
    pub logo_path: Option<PathBuf>,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            to: None,
            from: None,
            subject: None,
            subject_prefix: None,
            attachment_filename: None,
            inline_logo: true,
            logo_path: None,
        }
    }
}

/// Which record backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// Process-local map.
    #[default]
    Memory,
    /// JSON file under `store.dir`.
    File,
    /// Redis at `store.redis_url`.
    Redis,
}

/// Record store backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: StoreBackendKind,
    /// Directory for the file backend; the system temp dir when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Redis URL for the redis backend.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl StoreConfig {
    /// Directory used by the file backend.
    #[must_use]
    pub fn dir_or_default(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// HTTP route paths.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    /// Submission endpoint.
    #[serde(default = "default_submit_route")]
    pub submit: String,
    /// Status endpoint.
    #[serde(default = "default_status_route")]
    pub status: String,
    /// Retry endpoint.
    #[serde(default = "default_retry_route")]
    pub retry: String,
    /// Synchronous form-submission webhook.
    #[serde(default = "default_submission_route")]
    pub submission: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            submit: default_submit_route(),
            status: default_status_route(),
            retry: default_retry_route(),
            submission: default_submission_route(),
        }
    }
}

/// Default background worker path.
pub const DEFAULT_BACKGROUND_PATH: &str = "/api/leads/process";

fn default_slug() -> String {
    "leadkit".to_string()
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_trigger_timeout_ms() -> u64 {
    8000
}

const fn default_shutdown_grace_ms() -> u64 {
    30_000
}

const fn default_render_timeout_ms() -> u64 {
    25_000
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_connection_timeout_ms() -> u64 {
    8000
}

const fn default_greeting_timeout_ms() -> u64 {
    8000
}

const fn default_socket_timeout_ms() -> u64 {
    15_000
}

const fn default_true() -> bool {
    true
}

fn default_submit_route() -> String {
    "/api/leads".to_string()
}

fn default_status_route() -> String {
    "/api/leads/status".to_string()
}

fn default_retry_route() -> String {
    "/api/leads/retry".to_string()
}

fn default_submission_route() -> String {
    "/api/leads/submission-created".to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl LeadKitConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Configuration sources in merge order: `config/default.toml`,
    /// `config/local.toml`, then `LEADKIT_*` environment variables.
    #[must_use]
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("LEADKIT_").split("__"))
    }

    /// Extract configuration from a prepared figment.
    ///
    /// # Errors
    ///
    /// Returns error if the figment cannot be extracted.
    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Self = figment.extract()?;
        Ok(config)
    }

    /// Store name: configured value, then the adapter's, then
    /// `lead-kit-{slug}`.
    #[must_use]
    pub fn store_name(&self, adapter_store_name: Option<&str>, slug: &str) -> String {
        non_empty(self.jobs.store_name.as_deref())
            .or_else(|| non_empty(adapter_store_name))
            .map_or_else(|| format!("lead-kit-{}", slug.trim()), str::to_string)
    }

    /// Background worker path: configured value, then the adapter's, then
    /// [`DEFAULT_BACKGROUND_PATH`].
    #[must_use]
    pub fn background_path(&self, adapter_path: Option<&str>) -> String {
        non_empty(self.jobs.background_path.as_deref())
            .or_else(|| non_empty(adapter_path))
            .unwrap_or(DEFAULT_BACKGROUND_PATH)
            .to_string()
    }
}
