//! Client configuration

use std::sync::Arc;
use std::time::Duration;

use ouroboros_bson::StringEncoderCache;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConnectionError, Result};

/// Default message size cap (48 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// Sharded client configuration
///
/// Timeouts are stored in milliseconds so the struct maps directly onto
/// JSON; use the `Duration` accessors in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seed addresses (`host` or `host:port`)
    pub servers: Vec<String>,
    /// Query `config.mongos` on each seed to find every router (default: true)
    pub auto_discover_servers: bool,
    /// Physical connect timeout (default: 10s)
    pub connect_timeout_ms: u64,
    /// Upper bound on one seed's discovery round trip (default: 30s)
    pub discovery_timeout_ms: u64,
    /// Background ping period; 0 disables background pinging (default: 10s)
    pub ping_interval_ms: u64,
    /// Upper bound on one ping (default: 5s)
    pub ping_timeout_ms: u64,
    /// Weight given to each new latency sample (default: 0.3)
    pub latency_smoothing: f64,
    /// Largest accepted wire message (default: 48 MiB)
    pub max_message_size: usize,
    /// Encoder string cache bounds
    pub max_cached_string_entries: usize,
    pub max_cached_string_length: usize,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            auto_discover_servers: true,
            connect_timeout_ms: 10_000,
            discovery_timeout_ms: 30_000,
            ping_interval_ms: 10_000,
            ping_timeout_ms: 5_000,
            latency_smoothing: 0.3,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_cached_string_entries: StringEncoderCache::DEFAULT_MAX_ENTRIES,
            max_cached_string_length: StringEncoderCache::DEFAULT_MAX_LENGTH,
            app_name: None,
        }
    }
}

impl ClientConfig {
    /// Create a config seeded with the given servers
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConnectionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the connection layer cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(self.latency_smoothing > 0.0 && self.latency_smoothing <= 1.0) {
            return Err(ConnectionError::Config(format!(
                "latency_smoothing must be in (0, 1], got {}",
                self.latency_smoothing
            )));
        }
        if self.ping_timeout_ms == 0 {
            return Err(ConnectionError::Config(
                "ping_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_message_size < crate::message::HEADER_LENGTH {
            return Err(ConnectionError::Config(format!(
                "max_message_size {} is smaller than a message header",
                self.max_message_size
            )));
        }
        Ok(())
    }

    /// Replace every setting [`validate`](Self::validate) would reject with
    /// its default, logging each replacement
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.latency_smoothing > 0.0 && self.latency_smoothing <= 1.0) {
            warn!(
                latency_smoothing = self.latency_smoothing,
                "Invalid latency_smoothing, using the default"
            );
            self.latency_smoothing = defaults.latency_smoothing;
        }
        if self.ping_timeout_ms == 0 {
            warn!("ping_timeout_ms is zero, using the default");
            self.ping_timeout_ms = defaults.ping_timeout_ms;
        }
        if self.max_message_size < crate::message::HEADER_LENGTH {
            warn!(
                max_message_size = self.max_message_size,
                "max_message_size is smaller than a message header, using the default"
            );
            self.max_message_size = defaults.max_message_size;
        }
        self
    }

    /// Add a seed server
    pub fn add_server(mut self, server: impl Into<String>) -> Self {
        self.servers.push(server.into());
        self
    }

    /// Enable or disable `config.mongos` discovery
    pub fn auto_discover_servers(mut self, enabled: bool) -> Self {
        self.auto_discover_servers = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the background ping period; `Duration::ZERO` disables it
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_latency_smoothing(mut self, weight: f64) -> Self {
        self.latency_smoothing = weight;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_string_cache(mut self, max_entries: usize, max_length: usize) -> Self {
        self.max_cached_string_entries = max_entries;
        self.max_cached_string_length = max_length;
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// `None` when background pinging is disabled
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// A fresh encoder cache sized by this config
    pub fn string_cache(&self) -> Arc<StringEncoderCache> {
        Arc::new(StringEncoderCache::new(
            self.max_cached_string_entries,
            self.max_cached_string_length,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.auto_discover_servers);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.discovery_timeout(), Duration::from_secs(30));
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(10)));
        assert_eq!(config.ping_timeout(), Duration::from_secs(5));
        assert_eq!(config.latency_smoothing, 0.3);
        assert_eq!(config.max_cached_string_entries, 24);
        assert_eq!(config.max_cached_string_length, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::new(["mongos-1:27017"])
            .add_server("mongos-2")
            .auto_discover_servers(false)
            .with_ping_interval(Duration::ZERO)
            .with_discovery_timeout(Duration::from_millis(250))
            .with_app_name("probe");

        assert_eq!(config.servers, vec!["mongos-1:27017", "mongos-2"]);
        assert!(!config.auto_discover_servers);
        assert_eq!(config.ping_interval(), None);
        assert_eq!(config.discovery_timeout(), Duration::from_millis(250));
        assert_eq!(config.app_name.as_deref(), Some("probe"));
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            ClientConfig::from_json(r#"{"servers": ["a:1", "b:2"], "ping_interval_ms": 0}"#)
                .unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.ping_interval(), None);
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_json_rejects_bad_smoothing() {
        let err = ClientConfig::from_json(r#"{"latency_smoothing": 1.5}"#).unwrap_err();
        assert!(matches!(err, ConnectionError::Config(_)));
        assert!(ClientConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_sanitized_restores_rejected_settings() {
        let mut config = ClientConfig::new(["a"])
            .with_ping_timeout(Duration::ZERO)
            .with_latency_smoothing(0.0)
            .with_max_message_size(4);
        assert!(config.validate().is_err());

        config = config.sanitized();
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_timeout(), Duration::from_secs(5));
        assert_eq!(config.latency_smoothing, 0.3);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.servers, vec!["a"]);

        let valid = ClientConfig::default().with_ping_timeout(Duration::from_millis(10));
        assert_eq!(valid.clone().sanitized(), valid);
    }

    #[test]
    fn test_string_cache_bounds() {
        let cache = ClientConfig::default().with_string_cache(3, 4).string_cache();
        assert_eq!(cache.max_entries(), 3);
        assert_eq!(cache.max_length(), 4);
    }
}
