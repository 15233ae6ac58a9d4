//! Transport capability consumed by the query handler.
//!
//! A transport owns exactly one streaming connection per session. The
//! handler splits its calls across two tasks: a reader task issues every
//! `read`, the orchestrating task issues `dial`, `write` and `close`.

use crate::error::WsResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Socket abstraction driven by `QueryHandler`.
///
/// Implementations must be safe to share between the reader task and the
/// orchestrating task. `write` is never called concurrently with itself.
pub trait Transport: Send + Sync {
    /// Open the connection. Called once per session.
    fn dial<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, WsResult<()>>;

    /// Send one frame.
    fn write<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, WsResult<()>>;

    /// Wait for the next inbound frame.
    ///
    /// Blocks without a timeout, but must fail promptly once `close` is
    /// invoked from another task. The handler relies on this to stop its
    /// reader.
    fn read(&self) -> BoxFuture<'_, WsResult<Vec<u8>>>;

    /// Release the connection and unblock any in-flight `read`.
    fn close(&self) -> BoxFuture<'_, WsResult<()>>;
}
