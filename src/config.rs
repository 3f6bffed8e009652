//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::AppError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub client: ClientConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: String,

    /// Maximum accepted request body size (bytes).
    pub max_body_bytes: usize,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            max_body_bytes: 12 * 1024 * 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Chat stream pacing and limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay between the start frame and the first chunk (milliseconds).
    pub thinking_delay_ms: u64,

    /// Delay before each chunk frame (milliseconds).
    pub fragment_delay_ms: u64,

    /// Timeout for handing a single frame to the transport (seconds).
    pub write_timeout_secs: u64,

    /// Upper bound on a whole session (seconds).
    pub max_session_secs: u64,

    /// Session id generator: "timestamp" or "uuid".
    pub id_generator: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            thinking_delay_ms: 500,
            fragment_delay_ms: 50,
            write_timeout_secs: 10,
            max_session_secs: 60,
            id_generator: "timestamp".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn thinking_delay(&self) -> Duration {
        Duration::from_millis(self.thinking_delay_ms)
    }

    pub fn fragment_delay(&self) -> Duration {
        Duration::from_millis(self.fragment_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }
}

/// Settings for the `chat` subcommand.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of a running server.
    pub base_url: String,

    /// Give up on a stream after this long without bytes (seconds).
    pub silence_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            silence_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }
}

/// Static bearer tokens for the built-in identity provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token -> principal id.
    pub tokens: HashMap<String, String>,
}

/// Object storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prefix used when building public URLs for stored objects.
    pub public_base_url: String,

    /// Largest accepted upload (bytes).
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://127.0.0.1:3000/storage".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        match self.stream.id_generator.as_str() {
            "timestamp" | "uuid" => {}
            other => {
                return Err(AppError::Config(format!(
                    "Unknown id_generator: {}. Available: timestamp, uuid",
                    other
                )))
            }
        }
        if self.stream.max_session_secs == 0 {
            return Err(AppError::Config(
                "stream.max_session_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides read through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CHAT_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }

        if let Some(n) = lookup("CHAT_THINKING_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.stream.thinking_delay_ms = n;
        }
        if let Some(n) = lookup("CHAT_FRAGMENT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.stream.fragment_delay_ms = n;
        }
        if let Some(n) = lookup("CHAT_MAX_SESSION_SECS").and_then(|v| v.parse().ok()) {
            self.stream.max_session_secs = n;
        }
        if let Some(v) = lookup("CHAT_ID_GENERATOR") {
            self.stream.id_generator = v;
        }

        if let Some(v) = lookup("CHAT_BASE_URL") {
            self.client.base_url = v;
        }

        if let Some(v) = lookup("CHAT_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("CHAT_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        if let Some(v) = lookup("CHAT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("CHAT_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
