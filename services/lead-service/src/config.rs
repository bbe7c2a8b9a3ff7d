//! Configuration for the lead service.
//!
//! Shares its sources with [`LeadKitConfig`]; the service only adds the
//! listener and log settings on top.

use figment::Figment;
use leadkit::LeadKitConfig;
use serde::Deserialize;

/// Service configuration.
#[derive(Debug, Deserialize)]
pub struct LeadServiceConfig {
    /// Listener configuration.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Log output.
    #[serde(default)]
    pub log: LogConfig,
}

/// Service network configuration.
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Log configuration.
#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

impl LeadServiceConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(LeadKitConfig::figment())
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
}
