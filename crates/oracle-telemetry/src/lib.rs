//! Prometheus metrics and structured logging for oracle feed handlers.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus collectors for session state, errors, batches and writes

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
