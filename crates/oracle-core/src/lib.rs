//! Core types for streaming oracle price feeds.
//!
//! This crate provides the vocabulary shared by the feed handlers:
//! - `QueryKey` / `QueryValue`: bounds for the opaque key and value types
//! - `ResultBatch`: one delta of resolved and unresolved keyed results
//! - `ErrorKind`: lifecycle phase a failure is attributed to
//! - `CurrencyPair`: canonical key for tracked instruments

pub mod error;
pub mod market;
pub mod types;

pub use error::{CoreError, Result};
pub use market::CurrencyPair;
pub use types::{ErrorKind, Observation, QueryKey, QueryValue, ResultBatch};
