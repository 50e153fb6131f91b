//! Configuration for [`SyncHandle`](crate::SyncHandle).
//!
//! Build it in code with [`SyncConfig::new`] and the `with_*` methods, or
//! deserialize it (e.g. from the `[sync]` table of a TOML file). Durations
//! are plain millisecond fields so config files stay readable.

use std::time::Duration;

use livesync_core::{Backoff, MergeOptions, Timings, DEFAULT_PRIVATE_PREFIX};
use serde::Deserialize;

/// Configuration for a sync handle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Endpoint, absolute or relative to `base_url` (default: `/sync`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Origin that relative endpoints are resolved against.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Reconnect when no ping arrives for this long (default: 45s).
    #[serde(default = "default_ping_in_ms")]
    pub ping_in_ms: u64,
    /// Keepalive period (default: 25s).
    #[serde(default = "default_ping_out_ms")]
    pub ping_out_ms: u64,
    /// Sleep-detection tick period (default: 5s).
    #[serde(default = "default_sleep_check_ms")]
    pub sleep_check_ms: u64,
    /// Tick gap treated as a host wake-up (default: 30s).
    #[serde(default = "default_sleep_threshold_ms")]
    pub sleep_threshold_ms: u64,
    /// First reconnect delay (default: 100ms).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Reconnect delay ceiling (default: 30s).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random extra reconnect delay, up to this much (default: 0).
    #[serde(default)]
    pub jitter_ms: u64,
    /// Object keys starting with this character survive full snapshots
    /// (default: `$`). Set to `None` to disable.
    #[serde(default = "default_private_prefix")]
    pub private_prefix: Option<char>,
}

// Default value functions
fn default_url() -> String {
    "/sync".to_string()
}

fn default_ping_in_ms() -> u64 {
    45_000
}

fn default_ping_out_ms() -> u64 {
    25_000
}

fn default_sleep_check_ms() -> u64 {
    5_000
}

fn default_sleep_threshold_ms() -> u64 {
    30_000
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_private_prefix() -> Option<char> {
    Some(DEFAULT_PRIVATE_PREFIX)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            base_url: None,
            ping_in_ms: default_ping_in_ms(),
            ping_out_ms: default_ping_out_ms(),
            sleep_check_ms: default_sleep_check_ms(),
            sleep_threshold_ms: default_sleep_threshold_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: 0,
            private_prefix: default_private_prefix(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration for `url` with default timings.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    /// Resolve relative endpoints against `base_url`.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    /// Set the inbound ping deadline.
    pub fn with_ping_in(mut self, timeout: Duration) -> Self {
        self.ping_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the keepalive period.
    pub fn with_ping_out(mut self, interval: Duration) -> Self {
        self.ping_out_ms = interval.as_millis() as u64;
        self
    }

    /// Set the reconnect delay range.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Add random reconnect jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Set the private key prefix, or disable it with `None`.
    pub fn with_private_prefix(mut self, prefix: Option<char>) -> Self {
        self.private_prefix = prefix;
        self
    }

    /// Check that every timer period is non-zero.
    ///
    /// A zero keepalive, sleep-check or backoff period would re-arm its timer
    /// immediately and spin the driver.
    pub fn validate(&self) -> Result<(), String> {
        let periods = [
            ("ping_in_ms", self.ping_in_ms),
            ("ping_out_ms", self.ping_out_ms),
            ("sleep_check_ms", self.sleep_check_ms),
            ("sleep_threshold_ms", self.sleep_threshold_ms),
            ("base_delay_ms", self.base_delay_ms),
            ("max_delay_ms", self.max_delay_ms),
        ];
        match periods.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(format!("{name} must be greater than zero")),
            None => Ok(()),
        }
    }

    /// Timings for the state machine.
    pub fn timings(&self) -> Timings {
        Timings {
            ping_in: Duration::from_millis(self.ping_in_ms),
            ping_out: Duration::from_millis(self.ping_out_ms),
            sleep_check: Duration::from_millis(self.sleep_check_ms),
            sleep_threshold: Duration::from_millis(self.sleep_threshold_ms),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    /// Reconnect backoff policy.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(Duration::from_millis(self.jitter_ms))
    }

    /// Options for full-snapshot merges.
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            private_prefix: self.private_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_config_matches_client_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.url, "/sync");
        assert_eq!(config.timings(), Timings::default());
        assert_eq!(config.merge_options(), MergeOptions::default());
    }

    #[test]
    fn builder_sets_fields() {
        let config = SyncConfig::new("wss://example.com/live")
            .with_base_url("https://example.com")
            .with_ping_in(Duration::from_secs(10))
            .with_ping_out(Duration::from_secs(4))
            .with_backoff(Duration::from_millis(50), Duration::from_secs(5))
            .with_private_prefix(None);

        assert_eq!(config.url, "wss://example.com/live");
        assert_eq!(config.base_url.as_deref(), Some("https://example.com"));
        let timings = config.timings();
        assert_eq!(timings.ping_in, Duration::from_secs(10));
        assert_eq!(timings.ping_out, Duration::from_secs(4));
        assert_eq!(config.backoff().current(), Duration::from_millis(50));
        assert_eq!(config.merge_options(), MergeOptions::strict());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: SyncConfig = serde_json::from_value(json!({"url": "/live"})).unwrap();
        assert_eq!(config.url, "/live");
        assert_eq!(config.ping_in_ms, 45_000);
        assert_eq!(config.base_delay_ms, 100);
        assert_eq!(config.private_prefix, Some('$'));
    }

    #[test]
    fn fields_deserialize_in_milliseconds() {
        let config: SyncConfig = serde_json::from_value(json!({
            "base_url": "http://localhost:3000",
            "ping_in_ms": 1000,
            "max_delay_ms": 2000,
            "private_prefix": "_"
        }))
        .unwrap();
        assert_eq!(config.timings().ping_in, Duration::from_secs(1));
        assert_eq!(config.timings().max_delay, Duration::from_secs(2));
        assert_eq!(config.private_prefix, Some('_'));
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SyncConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_periods_are_rejected() {
        let config = SyncConfig::default().with_ping_out(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err("ping_out_ms must be greater than zero".to_string())
        );

        let config: SyncConfig = serde_json::from_value(json!({"sleep_check_ms": 0})).unwrap();
        assert!(config.validate().unwrap_err().contains("sleep_check_ms"));

        let config = SyncConfig::default().with_backoff(Duration::ZERO, Duration::from_secs(1));
        assert!(config.validate().unwrap_err().contains("base_delay_ms"));
    }
}
