//! Scripted capabilities for exercising `QueryHandler` without a network.
//!
//! Both doubles record every call so tests can assert counts and ordering.

use crate::error::{ProtocolError, WsError, WsResult};
use crate::protocol::{ParsedFrame, Protocol};
use crate::transport::{BoxFuture, Transport};
use oracle_core::{QueryKey, QueryValue};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A call observed by `ScriptedTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Dial(String),
    Write(Vec<u8>),
    Read,
    Close,
}

/// Transport double driven by a script of read outcomes.
///
/// Once the script is exhausted, reads either repeat a frame (see
/// `repeat_frame`) or block until `close` is called. With `ignore_close`,
/// they block forever instead.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    dial_error: Option<String>,
    close_error: Option<String>,
    /// Writes numbered from this value (1-based) fail.
    fail_writes_from: Option<(usize, String)>,
    reads: Mutex<VecDeque<Result<Vec<u8>, String>>>,
    repeat: Option<(Vec<u8>, Duration)>,
    ignore_close: bool,
    events: Mutex<Vec<TransportEvent>>,
    closed: CancellationToken,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_dial(mut self, message: impl Into<String>) -> Self {
        self.dial_error = Some(message.into());
        self
    }

    /// Fail the `n`th write (1-based) and every write after it.
    pub fn fail_writes_from(mut self, n: usize, message: impl Into<String>) -> Self {
        self.fail_writes_from = Some((n, message.into()));
        self
    }

    pub fn fail_close(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(message.into());
        self
    }

    pub fn with_frame(self, frame: impl Into<Vec<u8>>) -> Self {
        self.reads.lock().push_back(Ok(frame.into()));
        self
    }

    pub fn with_read_error(self, message: impl Into<String>) -> Self {
        self.reads.lock().push_back(Err(message.into()));
        self
    }

    /// After the script runs out, return `frame` every `every`.
    pub fn repeat_frame(mut self, frame: impl Into<Vec<u8>>, every: Duration) -> Self {
        self.repeat = Some((frame.into(), every));
        self
    }

    /// Reads past the script never return, even after `close`.
    pub fn ignore_close(mut self) -> Self {
        self.ignore_close = true;
        self
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Payloads passed to `write`, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn dial_count(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Dial(_)))
    }

    pub fn write_count(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Write(_)))
    }

    pub fn read_count(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Read))
    }

    pub fn close_count(&self) -> usize {
        self.count(|e| matches!(e, TransportEvent::Close))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn count(&self, pred: impl Fn(&TransportEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: TransportEvent) {
        self.events.lock().push(event);
    }
}

impl Transport for ScriptedTransport {
    fn dial<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(async move {
            self.record(TransportEvent::Dial(endpoint.to_string()));
            match &self.dial_error {
                Some(message) => Err(WsError::ConnectionFailed(message.clone())),
                None => Ok(()),
            }
        })
    }

    fn write<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(async move {
            self.record(TransportEvent::Write(payload.to_vec()));
            match &self.fail_writes_from {
                Some((n, message)) if self.write_count() >= *n => {
                    Err(WsError::SendFailed(message.clone()))
                }
                _ => Ok(()),
            }
        })
    }

    fn read(&self) -> BoxFuture<'_, WsResult<Vec<u8>>> {
        Box::pin(async move {
            self.record(TransportEvent::Read);
            let exhausted = self.reads.lock().is_empty();
            if self.ignore_close && exhausted {
                return std::future::pending().await;
            }
            if self.closed.is_cancelled() {
                return Err(WsError::Closed);
            }

            let next = self.reads.lock().pop_front();
            match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(message)) => Err(WsError::ReceiveFailed(message)),
                None => match &self.repeat {
                    Some((frame, every)) => tokio::select! {
                        () = self.closed.cancelled() => Err(WsError::Closed),
                        () = tokio::time::sleep(*every) => Ok(frame.clone()),
                    },
                    None => {
                        self.closed.cancelled().await;
                        Err(WsError::Closed)
                    }
                },
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move {
            self.record(TransportEvent::Close);
            self.closed.cancel();
            match &self.close_error {
                Some(message) => Err(WsError::SendFailed(message.clone())),
                None => Ok(()),
            }
        })
    }
}

/// Scripted outcome of one `parse` call.
#[derive(Debug, Clone)]
pub enum ParseStep<K: QueryKey, V> {
    Frame(ParsedFrame<K, V>),
    Fail(String),
    Panic(String),
}

/// Protocol double driven by a script of parse outcomes.
///
/// Once the script is exhausted, `parse` repeats the `repeat_parse` step or
/// returns an empty frame.
pub struct ScriptedProtocol<K: QueryKey, V: QueryValue> {
    name: String,
    endpoint: String,
    subscription: Result<Vec<u8>, String>,
    parses: Mutex<VecDeque<ParseStep<K, V>>>,
    repeat: Option<ParseStep<K, V>>,
    heartbeats: Result<Vec<Vec<u8>>, String>,
    subscription_calls: Mutex<Vec<Vec<K>>>,
    parsed: Mutex<Vec<Vec<u8>>>,
    name_reads: AtomicUsize,
    endpoint_reads: AtomicUsize,
}

impl<K: QueryKey, V: QueryValue> ScriptedProtocol<K, V> {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            subscription: Ok(b"subscribe".to_vec()),
            parses: Mutex::new(VecDeque::new()),
            repeat: None,
            heartbeats: Ok(Vec::new()),
            subscription_calls: Mutex::new(Vec::new()),
            parsed: Mutex::new(Vec::new()),
            name_reads: AtomicUsize::new(0),
            endpoint_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_subscription(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.subscription = Ok(payload.into());
        self
    }

    pub fn fail_subscription(mut self, message: impl Into<String>) -> Self {
        self.subscription = Err(message.into());
        self
    }

    pub fn with_parse(self, step: ParseStep<K, V>) -> Self {
        self.parses.lock().push_back(step);
        self
    }

    pub fn repeat_parse(mut self, step: ParseStep<K, V>) -> Self {
        self.repeat = Some(step);
        self
    }

    pub fn with_heartbeats(mut self, messages: Vec<Vec<u8>>) -> Self {
        self.heartbeats = Ok(messages);
        self
    }

    pub fn fail_heartbeats(mut self, message: impl Into<String>) -> Self {
        self.heartbeats = Err(message.into());
        self
    }

    /// Key sets passed to `build_subscription`.
    pub fn subscription_calls(&self) -> Vec<Vec<K>> {
        self.subscription_calls.lock().clone()
    }

    /// Frames passed to `parse`, in order.
    pub fn parsed_frames(&self) -> Vec<Vec<u8>> {
        self.parsed.lock().clone()
    }

    pub fn parse_count(&self) -> usize {
        self.parsed.lock().len()
    }

    /// Number of `name` and `endpoint` calls, in that order.
    pub fn metadata_reads(&self) -> (usize, usize) {
        (
            self.name_reads.load(Ordering::Relaxed),
            self.endpoint_reads.load(Ordering::Relaxed),
        )
    }
}

impl<K: QueryKey, V: QueryValue> Protocol<K, V> for ScriptedProtocol<K, V> {
    fn name(&self) -> &str {
        self.name_reads.fetch_add(1, Ordering::Relaxed);
        &self.name
    }

    fn endpoint(&self) -> &str {
        self.endpoint_reads.fetch_add(1, Ordering::Relaxed);
        &self.endpoint
    }

    fn build_subscription(&self, keys: &[K]) -> Result<Vec<u8>, ProtocolError> {
        self.subscription_calls.lock().push(keys.to_vec());
        self.subscription
            .clone()
            .map_err(ProtocolError::Subscription)
    }

    fn parse(&self, frame: &[u8]) -> Result<ParsedFrame<K, V>, ProtocolError> {
        self.parsed.lock().push(frame.to_vec());

        let step = self
            .parses
            .lock()
            .pop_front()
            .or_else(|| self.repeat.clone());

        match step {
            Some(ParseStep::Frame(parsed)) => Ok(parsed),
            Some(ParseStep::Fail(message)) => Err(ProtocolError::Parse(message)),
            Some(ParseStep::Panic(message)) => panic!("{message}"),
            None => Ok(ParsedFrame::default()),
        }
    }

    fn heartbeat_messages(&self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        self.heartbeats.clone().map_err(ProtocolError::Heartbeat)
    }
}
