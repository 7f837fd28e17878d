//! Configuration for the telemetry poller

use crate::client::DEFAULT_DEVICE_ID;
use crate::error::{GruenbeckError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{env, time::Duration};
use url::Url;

/// Path of the status endpoint on the device
pub const ENDPOINT_PATH: &str = "mux_http";

/// Longest accepted polling interval (one week)
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Poller configuration for one softener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Device address (e.g. "192.168.1.40" or "http://softener.local")
    pub host: String,

    /// Polling interval in whole seconds (minimum 1)
    pub interval_secs: u64,

    /// Ceiling for one fetch
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Value of the `id` field in the query body
    pub device_id: u32,

    /// Keep ticking while nobody is subscribed
    pub poll_without_subscribers: bool,

    /// Mark the device unavailable after this many consecutive empty responses
    pub degrade_after_empty: Option<u32>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Log to file (path)
    pub file: Option<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            host: "172.16.0.41".to_string(),
            interval_secs: 45,
            timeout: Duration::from_secs(30),
            device_id: DEFAULT_DEVICE_ID,
            poll_without_subscribers: false,
            degrade_after_empty: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file: None,
        }
    }
}

impl PollerConfig {
    /// Create a configuration for `host` with default settings
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the polling interval
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Set the fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GruenbeckError::config(format!("Failed to read {}: {e}", path.display()))
        })?;

        let config: PollerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `GRUENBECK_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("GRUENBECK_HOST") {
            self.host = host;
        }

        if let Ok(interval) = env::var("GRUENBECK_INTERVAL") {
            self.interval_secs = interval
                .parse()
                .map_err(|e| GruenbeckError::config(format!("Invalid GRUENBECK_INTERVAL: {e}")))?;
        }

        if let Ok(timeout) = env::var("GRUENBECK_TIMEOUT") {
            self.timeout = Duration::from_secs(
                timeout
                    .parse()
                    .map_err(|e| GruenbeckError::config(format!("Invalid GRUENBECK_TIMEOUT: {e}")))?,
            );
        }

        if let Ok(device_id) = env::var("GRUENBECK_DEVICE_ID") {
            self.device_id = device_id
                .parse()
                .map_err(|e| GruenbeckError::config(format!("Invalid GRUENBECK_DEVICE_ID: {e}")))?;
        }

        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }

        self.validate()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GruenbeckError::config("Host must not be empty"));
        }

        if self.interval_secs == 0 {
            return Err(GruenbeckError::config(
                "Polling interval must be at least 1 second",
            ));
        }

        if self.interval_secs > MAX_INTERVAL_SECS {
            return Err(GruenbeckError::config(format!(
                "Polling interval must not exceed {MAX_INTERVAL_SECS} seconds"
            )));
        }

        if self.timeout.is_zero() {
            return Err(GruenbeckError::config("Fetch timeout must be positive"));
        }

        self.endpoint().map(|_| ())
    }

    /// Polling interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Full endpoint URL, `http://<host>/mux_http`
    pub fn endpoint(&self) -> Result<Url> {
        let host = self.host.trim().trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/")
        } else {
            format!("http://{host}/")
        };

        Url::parse(&base)
            .and_then(|url| url.join(ENDPOINT_PATH))
            .map_err(|e| GruenbeckError::config(format!("Invalid host {host}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.interval_secs, 45);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.device_id, 626);
        assert!(!config.poll_without_subscribers);
        assert!(config.degrade_after_empty.is_none());
    }

    #[test]
    fn test_endpoint_from_bare_host() {
        let config = PollerConfig::new("172.16.0.41");
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "http://172.16.0.41/mux_http"
        );
    }

    #[test]
    fn test_endpoint_keeps_scheme_and_port() {
        let config = PollerConfig::new("http://127.0.0.1:8080/");
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "http://127.0.0.1:8080/mux_http"
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = PollerConfig::new("softener.local").with_interval(0);
        assert!(matches!(config.validate(), Err(GruenbeckError::Config(_))));
    }

    #[test]
    fn test_huge_interval_rejected() {
        let config = PollerConfig::new("softener.local").with_interval(u64::MAX);
        assert!(matches!(config.validate(), Err(GruenbeckError::Config(_))));

        let config = PollerConfig::new("softener.local").with_interval(MAX_INTERVAL_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(PollerConfig::new("  ").validate().is_err());
    }
}
