//! Configuration loading for the `watch` command.
//!
//! Configuration is loaded from a TOML file:
//!
//! ```toml
//! transport = "push"
//!
//! [sync]
//! url = "/sync"
//! base_url = "https://example.com"
//! ping_in_ms = 45000
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use livesync_client::{SyncConfig, TransportKind};
use serde::Deserialize;
use std::path::Path;

/// Which transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportChoice {
    /// WebSocket
    Stream,
    /// Server-sent events
    Push,
}

impl TransportChoice {
    /// Pick the transport an endpoint's scheme implies.
    pub fn for_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://")?.0.to_ascii_lowercase();
        match scheme.as_str() {
            "ws" | "wss" => Some(Self::Stream),
            "http" | "https" => Some(Self::Push),
            _ => None,
        }
    }
}

impl From<TransportChoice> for TransportKind {
    fn from(choice: TransportChoice) -> Self {
        match choice {
            TransportChoice::Stream => TransportKind::Stream,
            TransportChoice::Push => TransportKind::Push,
        }
    }
}

/// Root configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Transport, unless given on the command line.
    #[serde(default)]
    pub transport: Option<TransportChoice>,
    /// Connection settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CliConfig {
    /// Load configuration from a TOML file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CliConfig::parse("").unwrap();
        assert_eq!(config.transport, None);
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
transport = "push"

[sync]
url = "/live"
base_url = "https://example.com"
ping_in_ms = 10000
max_delay_ms = 5000
private_prefix = "_"
"#;

        let config = CliConfig::parse(toml).unwrap();
        assert_eq!(config.transport, Some(TransportChoice::Push));
        assert_eq!(config.sync.url, "/live");
        assert_eq!(config.sync.base_url.as_deref(), Some("https://example.com"));
        assert_eq!(config.sync.ping_in_ms, 10_000);
        assert_eq!(config.sync.max_delay_ms, 5_000);
        assert_eq!(config.sync.ping_out_ms, 25_000);
        assert_eq!(config.sync.private_prefix, Some('_'));
    }

    #[test]
    fn unknown_transport_is_rejected() {
        assert!(CliConfig::parse(r#"transport = "carrier-pigeon""#).is_err());
    }

    #[test]
    fn transport_follows_scheme() {
        assert_eq!(
            TransportChoice::for_url("wss://example.com/sync"),
            Some(TransportChoice::Stream)
        );
        assert_eq!(
            TransportChoice::for_url("HTTP://example.com/sync"),
            Some(TransportChoice::Push)
        );
        assert_eq!(TransportChoice::for_url("/sync"), None);
    }

    #[tokio::test]
    async fn missing_file_names_path() {
        let err = CliConfig::from_file(Path::new("/nonexistent/livesync.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/livesync.toml"));
    }
}
