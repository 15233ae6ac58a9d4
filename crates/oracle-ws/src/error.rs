//! Query handler error types.

use oracle_core::ErrorKind;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Transport closed locally")]
    Closed,

    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type WsResult<T> = Result<T, WsError>;

/// Codec failures reported by a `Protocol` implementation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to build subscription: {0}")]
    Subscription(String),

    #[error("Failed to parse frame: {0}")]
    Parse(String),

    #[error("Failed to build heartbeat: {0}")]
    Heartbeat(String),

    #[error("Codec panicked in {op}: {message}")]
    Panicked { op: &'static str, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handler construction and configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Protocol capability is required")]
    MissingProtocol,

    #[error("Transport capability is required")]
    MissingTransport,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A session failure attributed to a lifecycle phase.
#[derive(Debug, Error)]
#[error("{kind} failed: {source}")]
pub struct SessionError {
    pub kind: ErrorKind,
    #[source]
    pub source: WsError,
}

impl SessionError {
    pub fn new(kind: ErrorKind, source: impl Into<WsError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}
