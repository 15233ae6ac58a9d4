//! Error types for oracle-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid currency pair: {0}")]
    InvalidCurrencyPair(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
