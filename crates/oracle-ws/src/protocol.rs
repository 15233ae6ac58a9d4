//! Protocol capability consumed by the query handler.
//!
//! A protocol is a per-source codec: it turns the requested keys into a
//! subscription payload and inbound frames into keyed results. It performs
//! no I/O; every call is expected to return without blocking.

use crate::error::ProtocolError;
use oracle_core::{QueryKey, QueryValue, ResultBatch};
use std::panic::{self, AssertUnwindSafe};

/// Outcome of parsing one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame<K: QueryKey, V> {
    /// Results carried by the frame. May be empty.
    pub batch: ResultBatch<K, V>,
    /// Frame the source expects in response (heartbeat/ack), if any.
    pub reply: Option<Vec<u8>>,
}

impl<K: QueryKey, V> ParsedFrame<K, V> {
    pub fn new(batch: ResultBatch<K, V>) -> Self {
        Self { batch, reply: None }
    }

    /// A frame with no results that only requests a reply.
    pub fn reply_only(reply: impl Into<Vec<u8>>) -> Self {
        Self {
            batch: ResultBatch::new(),
            reply: Some(reply.into()),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<Vec<u8>>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

impl<K: QueryKey, V> Default for ParsedFrame<K, V> {
    fn default() -> Self {
        Self::new(ResultBatch::new())
    }
}

/// Source-specific codec driven by `QueryHandler`.
pub trait Protocol<K: QueryKey, V: QueryValue>: Send + Sync {
    /// Provider name, used in logs and metrics.
    fn name(&self) -> &str;

    /// Endpoint the transport should dial.
    fn endpoint(&self) -> &str;

    /// Build the subscription payload for the requested keys.
    fn build_subscription(&self, keys: &[K]) -> Result<Vec<u8>, ProtocolError>;

    /// Parse one inbound frame.
    fn parse(&self, frame: &[u8]) -> Result<ParsedFrame<K, V>, ProtocolError>;

    /// Frames to send on every periodic heartbeat tick.
    ///
    /// Only called when the handler is configured with a heartbeat interval.
    fn heartbeat_messages(&self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        Ok(Vec::new())
    }
}

/// Run a codec call, converting a panic into `ProtocolError::Panicked`.
pub(crate) fn guard<T, F>(op: &'static str, f: F) -> Result<T, ProtocolError>
where
    F: FnOnce() -> Result<T, ProtocolError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(ProtocolError::Panicked { op, message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::{ErrorKind, Observation};

    #[test]
    fn test_guard_passes_through() {
        let ok: Result<u32, _> = guard("parse", || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, _> = guard("parse", || Err(ProtocolError::Parse("bad".into())));
        assert!(matches!(err, Err(ProtocolError::Parse(_))));
    }

    #[test]
    fn test_guard_catches_panic() {
        let result: Result<u32, _> = guard("parse", || panic!("index out of range"));

        match result {
            Err(ProtocolError::Panicked { op, message }) => {
                assert_eq!(op, "parse");
                assert_eq!(message, "index out of range");
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn test_guard_catches_formatted_panic() {
        let result: Result<u32, _> = guard("build_subscription", || panic!("bad key {}", 3));
        assert!(
            matches!(result, Err(ProtocolError::Panicked { ref message, .. }) if message == "bad key 3")
        );
    }

    #[test]
    fn test_parsed_frame_builders() {
        let frame: ParsedFrame<String, u64> = ParsedFrame::reply_only(b"pong".to_vec());
        assert!(frame.batch.is_empty());
        assert_eq!(frame.reply.as_deref(), Some(&b"pong"[..]));

        let mut batch = ResultBatch::new();
        batch.insert_resolved("BTC/USD".to_string(), Observation::new(100u64));
        batch.insert_unresolved("ATOM/USD".to_string(), ErrorKind::Parse);
        let frame = ParsedFrame::new(batch).with_reply("ack");
        assert_eq!(frame.batch.len(), 2);
        assert_eq!(frame.reply, Some(b"ack".to_vec()));
    }
}
