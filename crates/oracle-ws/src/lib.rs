//! Streaming query handler for WebSocket oracle price feeds.
//!
//! Provides:
//! - `QueryHandler`: per-connection session engine (handshake, read loop,
//!   cancellation, heartbeat replies)
//! - `Transport` / `Protocol`: injected socket and codec capabilities
//! - `WsTransport`: tokio-tungstenite implementation of `Transport`
//! - `WebSocketConfig`: provider configuration loaded from TOML
//! - `testing`: scripted capabilities for deterministic tests

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::WebSocketConfig;
pub use connection::WsTransport;
pub use error::{ConfigError, ProtocolError, SessionError, WsError, WsResult};
pub use handler::{result_channel, QueryHandler, QueryHandlerBuilder, SessionState};
pub use heartbeat::{Heartbeat, HeartbeatStats};
pub use protocol::{ParsedFrame, Protocol};
pub use transport::{BoxFuture, Transport};
