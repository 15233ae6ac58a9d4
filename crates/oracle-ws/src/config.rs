//! WebSocket provider configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for one WebSocket-backed provider.
///
/// Timeouts apply to the bundled `WsTransport`; the handler itself only uses
/// the heartbeat interval and the reader shutdown grace period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Provider name, used as the metrics label.
    pub name: String,
    /// Whether the provider is WebSocket based. Disabled configs skip validation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum time to open the socket and complete the upgrade (ms).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Maximum time for a single frame write (ms).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Outgoing buffer size before frames are flushed (bytes).
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    /// Largest inbound message accepted (bytes).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Capacity of the result channel handed to the handler.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Periodic heartbeat interval (ms). 0 disables periodic heartbeats.
    #[serde(default)]
    pub heartbeat_interval_ms: u64,
    /// How long teardown waits for the reader task after close (ms).
    #[serde(default = "default_reader_shutdown_grace_ms")]
    pub reader_shutdown_grace_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_write_buffer_size() -> usize {
    128 * 1024
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_buffer_size() -> usize {
    1024
}

fn default_reader_shutdown_grace_ms() -> u64 {
    1_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            name: "websocket".to_string(),
            enabled: default_enabled(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            write_buffer_size: default_write_buffer_size(),
            max_message_size: default_max_message_size(),
            max_buffer_size: default_max_buffer_size(),
            heartbeat_interval_ms: 0,
            reader_shutdown_grace_ms: default_reader_shutdown_grace_ms(),
        }
    }
}

impl WebSocketConfig {
    /// Create a config with defaults for the named provider.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the config for values the transport and handler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider name cannot be empty".into()));
        }

        if self.handshake_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake and write timeouts must be strictly positive".into(),
            ));
        }

        if self.write_buffer_size == 0 || self.max_message_size == 0 || self.max_buffer_size == 0
        {
            return Err(ConfigError::Invalid(
                "buffer and message sizes must be strictly positive".into(),
            ));
        }

        if self.max_message_size < self.write_buffer_size {
            return Err(ConfigError::Invalid(format!(
                "max_message_size ({}) must be at least write_buffer_size ({})",
                self.max_message_size, self.write_buffer_size
            )));
        }

        if self.heartbeat_interval_ms > 0 && self.heartbeat_interval_ms < self.write_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval_ms ({}) must be 0 or at least write_timeout_ms ({})",
                self.heartbeat_interval_ms, self.write_timeout_ms
            )));
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reader_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.reader_shutdown_grace_ms)
    }
}
