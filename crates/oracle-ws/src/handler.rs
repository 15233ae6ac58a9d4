//! Query handler: drives one streaming session per `run` call.
//!
//! A session dials the protocol's endpoint, writes the subscription built
//! from the requested keys, then streams parsed results to the caller's sink
//! until cancellation or a connection-fatal error. Handshake failures are
//! reported per key; failures after streaming starts end the session without
//! per-key detail.

use crate::config::WebSocketConfig;
use crate::error::{ConfigError, SessionError, WsError, WsResult};
use crate::heartbeat::Heartbeat;
use crate::protocol::{guard, ParsedFrame, Protocol};
use crate::transport::Transport;
use oracle_core::{ErrorKind, QueryKey, QueryValue, ResultBatch};
use oracle_telemetry::Metrics;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Dialing,
    Subscribing,
    Handshaking,
    Streaming,
    Closing,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Dialing => "dialing",
            Self::Subscribing => "subscribing",
            Self::Handshaking => "handshaking",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create a bounded result channel sized from the config.
pub fn result_channel<K: QueryKey, V: QueryValue>(
    config: &WebSocketConfig,
) -> (
    mpsc::Sender<ResultBatch<K, V>>,
    mpsc::Receiver<ResultBatch<K, V>>,
) {
    mpsc::channel(config.max_buffer_size.max(1))
}

/// Streams keyed results from one protocol over one transport.
///
/// One `run` at a time per handler: the transport holds a single connection.
pub struct QueryHandler<K: QueryKey, V: QueryValue> {
    config: WebSocketConfig,
    protocol: Arc<dyn Protocol<K, V>>,
    transport: Arc<dyn Transport>,
    state: Arc<RwLock<SessionState>>,
}

impl<K: QueryKey, V: QueryValue> fmt::Debug for QueryHandler<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandler")
            .field("provider", &self.protocol.name())
            .field("endpoint", &self.protocol.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl<K: QueryKey, V: QueryValue> QueryHandler<K, V> {
    /// Create a handler. Both capabilities are required and the config must
    /// validate.
    pub fn new(
        config: WebSocketConfig,
        protocol: Option<Arc<dyn Protocol<K, V>>>,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self, ConfigError> {
        let protocol = protocol.ok_or(ConfigError::MissingProtocol)?;
        let transport = transport.ok_or(ConfigError::MissingTransport)?;
        config.validate()?;

        Ok(Self {
            config,
            protocol,
            transport,
            state: Arc::new(RwLock::new(SessionState::Created)),
        })
    }

    pub fn builder() -> QueryHandlerBuilder<K, V> {
        QueryHandlerBuilder::default()
    }

    /// Provider name reported by the protocol.
    pub fn name(&self) -> &str {
        self.protocol.name()
    }

    /// State of the current (or last) session.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Run one session until `cancel` fires or the connection fails.
    ///
    /// Outcomes are reported only through `sink`. The sink is never closed
    /// by the handler; a full sink stalls the session instead of dropping
    /// batches.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        keys: Vec<K>,
        sink: mpsc::Sender<ResultBatch<K, V>>,
    ) {
        let mut session = Session::new(self, keys, sink);
        info!(
            provider = %session.provider,
            endpoint = %session.endpoint,
            keys = session.keys.len(),
            "Starting query handler session"
        );

        match session.handshake().await {
            Ok(()) => session.stream(&cancel).await,
            Err(err) => session.fail_handshake(err).await,
        }

        session.terminate();
    }
}

/// Builder for `QueryHandler`.
pub struct QueryHandlerBuilder<K: QueryKey, V: QueryValue> {
    config: Option<WebSocketConfig>,
    protocol: Option<Arc<dyn Protocol<K, V>>>,
    transport: Option<Arc<dyn Transport>>,
}

impl<K: QueryKey, V: QueryValue> Default for QueryHandlerBuilder<K, V> {
    fn default() -> Self {
        Self {
            config: None,
            protocol: None,
            transport: None,
        }
    }
}

impl<K: QueryKey, V: QueryValue> QueryHandlerBuilder<K, V> {
    pub fn config(mut self, config: WebSocketConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn protocol(mut self, protocol: Arc<dyn Protocol<K, V>>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the handler. Without an explicit config, defaults named after
    /// the protocol are used.
    pub fn build(self) -> Result<QueryHandler<K, V>, ConfigError> {
        let config = match (self.config, &self.protocol) {
            (Some(config), _) => config,
            (None, Some(protocol)) => WebSocketConfig::named(protocol.name()),
            (None, None) => return Err(ConfigError::MissingProtocol),
        };
        QueryHandler::new(config, self.protocol, self.transport)
    }
}

/// What the streaming loop does after handling an event.
enum Step {
    Continue,
    Stop,
}

/// State owned by a single `run` invocation.
struct Session<'h, K: QueryKey, V: QueryValue> {
    handler: &'h QueryHandler<K, V>,
    provider: String,
    endpoint: String,
    keys: Vec<K>,
    tracked: HashSet<K>,
    sink: mpsc::Sender<ResultBatch<K, V>>,
    heartbeat: Heartbeat,
    started: Instant,
    dialed: bool,
    closed: bool,
}

impl<'h, K: QueryKey, V: QueryValue> Session<'h, K, V> {
    fn new(
        handler: &'h QueryHandler<K, V>,
        keys: Vec<K>,
        sink: mpsc::Sender<ResultBatch<K, V>>,
    ) -> Self {
        let tracked = keys.iter().cloned().collect();
        let session = Self {
            handler,
            provider: handler.protocol.name().to_string(),
            endpoint: handler.protocol.endpoint().to_string(),
            keys,
            tracked,
            sink,
            heartbeat: Heartbeat::new(handler.config.heartbeat_interval_ms),
            started: Instant::now(),
            dialed: false,
            closed: false,
        };
        session.transition(SessionState::Created);
        session
    }

    fn transition(&self, next: SessionState) {
        let prev = std::mem::replace(&mut *self.handler.state.write(), next);
        Metrics::session_state_set(&self.provider, next.as_str());
        debug!(provider = %self.provider, from = %prev, to = %next, "Session state change");
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Dialing);
        self.handler
            .transport
            .dial(&self.endpoint)
            .await
            .map_err(|e| SessionError::new(ErrorKind::Dial, e))?;
        self.dialed = true;
        info!(provider = %self.provider, endpoint = %self.endpoint, "Connected");

        self.transition(SessionState::Subscribing);
        let protocol = &self.handler.protocol;
        let keys = &self.keys;
        let payload = guard("build_subscription", || protocol.build_subscription(keys))
            .map_err(|e| SessionError::new(ErrorKind::BuildSubscription, e))?;

        self.transition(SessionState::Handshaking);
        self.write(&payload, "subscribe").await?;
        info!(
            provider = %self.provider,
            keys = self.keys.len(),
            bytes = payload.len(),
            "Subscription sent"
        );

        Ok(())
    }

    /// Report a handshake failure against every requested key.
    async fn fail_handshake(&mut self, err: SessionError) {
        debug_assert!(err.kind.is_attributable(), "{} is not a handshake failure", err.kind);
        error!(
            provider = %self.provider,
            kind = %err.kind,
            error = %err.source,
            keys = ?self.keys,
            "Handshake failed"
        );
        Metrics::error(&self.provider, err.kind.as_str());

        let batch = ResultBatch::unresolved_all(&self.keys, err.kind);
        self.deliver(batch).await;

        if self.dialed {
            self.close().await;
        }
    }

    async fn stream(&mut self, cancel: &CancellationToken) {
        self.transition(SessionState::Streaming);
        if self.heartbeat.is_enabled() {
            debug!(
                provider = %self.provider,
                interval_ms = self.handler.config.heartbeat_interval_ms,
                "Periodic heartbeats enabled"
            );
        }

        let (frame_tx, mut frame_rx) = mpsc::channel::<WsResult<Vec<u8>>>(1);
        let (resume_tx, resume_rx) = mpsc::channel::<()>(1);
        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.handler.transport),
            frame_tx,
            resume_rx,
        ));

        loop {
            let step = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(provider = %self.provider, "Session cancelled");
                    Step::Stop
                }

                item = frame_rx.recv() => match item {
                    Some(Ok(frame)) => {
                        let step = match self.handle_frame(&frame).await {
                            Ok(step) => step,
                            Err(err) if err.kind.is_recoverable() => {
                                self.skip_frame(err, frame.len());
                                Step::Continue
                            }
                            Err(err) => {
                                self.fail_stream(err);
                                Step::Stop
                            }
                        };
                        match step {
                            Step::Continue => self.resume_reader(&resume_tx).await,
                            Step::Stop => Step::Stop,
                        }
                    }
                    Some(Err(e)) => {
                        self.fail_stream(SessionError::new(ErrorKind::Read, e));
                        Step::Stop
                    }
                    None => {
                        self.fail_stream(SessionError::new(
                            ErrorKind::Read,
                            WsError::ReceiveFailed("reader task exited".into()),
                        ));
                        Step::Stop
                    }
                },

                () = self.heartbeat.tick() => match self.send_heartbeats().await {
                    Ok(()) => Step::Continue,
                    Err(err) => {
                        self.fail_stream(err);
                        Step::Stop
                    }
                },
            };

            if let Step::Stop = step {
                break;
            }
        }

        self.close().await;
        // Release the reader whether it is blocked sending a frame or
        // waiting to resume.
        drop(frame_rx);
        drop(resume_tx);
        self.join_reader(reader).await;
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Result<Step, SessionError> {
        self.heartbeat.record_frame();
        Metrics::frame_read(&self.provider);

        let protocol = &self.handler.protocol;
        let parsed = guard("parse", || protocol.parse(frame))
            .map_err(|e| SessionError::new(ErrorKind::Parse, e))?;

        let ParsedFrame { mut batch, reply } = parsed;
        let tracked = &self.tracked;
        let dropped = batch.retain_keys(|key| tracked.contains(key));
        if dropped > 0 {
            debug!(provider = %self.provider, dropped, "Ignored results for untracked keys");
        }

        if !batch.is_empty() && !self.deliver(batch).await {
            return Ok(Step::Stop);
        }

        if let Some(reply) = reply {
            self.write(&reply, "reply").await?;
            self.heartbeat.record_reply();
        }

        Ok(Step::Continue)
    }

    /// Let the reader issue its next read.
    async fn resume_reader(&self, resume_tx: &mpsc::Sender<()>) -> Step {
        if resume_tx.send(()).await.is_ok() {
            return Step::Continue;
        }
        self.fail_stream(SessionError::new(
            ErrorKind::Read,
            WsError::ReceiveFailed("reader task exited".into()),
        ));
        Step::Stop
    }

    async fn send_heartbeats(&mut self) -> Result<(), SessionError> {
        let protocol = &self.handler.protocol;
        let messages = match guard("heartbeat_messages", || protocol.heartbeat_messages()) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Skipping heartbeat");
                return Ok(());
            }
        };

        for message in &messages {
            self.write(message, "heartbeat").await?;
            self.heartbeat.record_heartbeat();
        }
        Ok(())
    }

    async fn write(&self, payload: &[u8], purpose: &'static str) -> Result<(), SessionError> {
        self.handler
            .transport
            .write(payload)
            .await
            .map_err(|e| SessionError::new(ErrorKind::Write, e))?;
        Metrics::frame_written(&self.provider, purpose);
        Ok(())
    }

    /// Send a batch to the consumer. Returns false if the consumer is gone.
    async fn deliver(&self, batch: ResultBatch<K, V>) -> bool {
        if batch.is_empty() {
            return true;
        }

        let size = batch.len();
        if self.sink.send(batch).await.is_err() {
            warn!(provider = %self.provider, "Result consumer dropped, stopping session");
            return false;
        }

        Metrics::batch_sent(&self.provider);
        debug!(provider = %self.provider, size, "Delivered batch");
        true
    }

    /// Log a failure the session survives and drop the frame it came from.
    fn skip_frame(&self, err: SessionError, bytes: usize) {
        warn!(
            provider = %self.provider,
            kind = %err.kind,
            error = %err.source,
            bytes,
            "Dropping frame that failed to parse"
        );
        Metrics::error(&self.provider, err.kind.as_str());
    }

    fn fail_stream(&self, err: SessionError) {
        error!(
            provider = %self.provider,
            kind = %err.kind,
            error = %err.source,
            "Session failed while streaming"
        );
        Metrics::error(&self.provider, err.kind.as_str());
    }

    /// Close the transport. Runs at most once per session; failures are
    /// logged only.
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transition(SessionState::Closing);

        if let Err(e) = self.handler.transport.close().await {
            warn!(
                provider = %self.provider,
                kind = %ErrorKind::Close,
                error = %e,
                "Failed to close transport"
            );
            Metrics::error(&self.provider, ErrorKind::Close.as_str());
        }
    }

    async fn join_reader(&self, mut reader: JoinHandle<()>) {
        let grace = self.handler.config.reader_shutdown_grace();
        match tokio::time::timeout(grace, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(provider = %self.provider, error = %e, "Reader task ended abnormally");
            }
            Err(_) => {
                warn!(
                    provider = %self.provider,
                    grace_ms = grace.as_millis() as u64,
                    "Reader task still blocked after close, aborting"
                );
                reader.abort();
            }
        }
    }

    fn terminate(&self) {
        self.transition(SessionState::Terminated);

        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        Metrics::session_duration(&self.provider, elapsed_ms);

        let stats = self.heartbeat.stats();
        info!(
            provider = %self.provider,
            duration_ms = elapsed_ms as u64,
            started_at = %stats.started_at,
            last_frame = ?stats.last_frame,
            idle_ms = ?self.heartbeat.time_since_last_frame_ms(),
            frames = stats.frames,
            replies = stats.replies,
            heartbeats = stats.heartbeats,
            "Query handler session terminated"
        );
    }
}

/// Reader task: forwards each read outcome, then waits for the orchestrator
/// to finish with the frame before reading again.
///
/// Exits after forwarding an error, or once either channel is closed by the
/// orchestrator.
async fn read_loop(
    transport: Arc<dyn Transport>,
    frames: mpsc::Sender<WsResult<Vec<u8>>>,
    mut resume: mpsc::Receiver<()>,
) {
    loop {
        let outcome = transport.read().await;
        let failed = outcome.is_err();

        if frames.send(outcome).await.is_err() || failed {
            return;
        }

        if resume.recv().await.is_none() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProtocol, ScriptedTransport};
    use oracle_core::CurrencyPair;
    use rust_decimal::Decimal;

    type Handler = QueryHandler<CurrencyPair, Decimal>;

    #[test]
    fn test_builder_requires_protocol() {
        let transport = Arc::new(ScriptedTransport::new());
        let result = Handler::builder().transport(transport).build();
        assert!(matches!(result, Err(ConfigError::MissingProtocol)));
    }

    #[test]
    fn test_builder_requires_transport() {
        let protocol = Arc::new(ScriptedProtocol::<CurrencyPair, Decimal>::new(
            "test_ws",
            "ws://localhost:8080",
        ));
        let result = Handler::builder().protocol(protocol).build();
        assert!(matches!(result, Err(ConfigError::MissingTransport)));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let protocol = Arc::new(ScriptedProtocol::<CurrencyPair, Decimal>::new(
            "test_ws",
            "ws://localhost:8080",
        ));
        let config = WebSocketConfig {
            write_timeout_ms: 0,
            ..WebSocketConfig::named("test_ws")
        };

        let result = Handler::builder()
            .config(config)
            .protocol(protocol)
            .transport(Arc::new(ScriptedTransport::new()))
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_builder_defaults_config_to_protocol_name() {
        let protocol = Arc::new(ScriptedProtocol::<CurrencyPair, Decimal>::new(
            "test_ws",
            "ws://localhost:8080",
        ));
        let handler = Handler::builder()
            .protocol(protocol)
            .transport(Arc::new(ScriptedTransport::new()))
            .build()
            .unwrap();

        assert_eq!(handler.config().name, "test_ws");
        assert_eq!(handler.name(), "test_ws");
        assert_eq!(handler.state(), SessionState::Created);
    }

    #[test]
    fn test_result_channel_uses_buffer_size() {
        let config = WebSocketConfig {
            max_buffer_size: 3,
            ..WebSocketConfig::named("test_ws")
        };
        let (tx, _rx) = result_channel::<CurrencyPair, Decimal>(&config);
        assert_eq!(tx.capacity(), 3);
    }

    #[tokio::test]
    async fn test_reader_stops_after_error() {
        let transport = Arc::new(ScriptedTransport::new().with_read_error("boom"));
        let (frame_tx, mut frame_rx) = mpsc::channel(1);
        let (_resume_tx, resume_rx) = mpsc::channel(1);

        let reader = tokio::spawn(read_loop(transport.clone(), frame_tx, resume_rx));

        assert!(matches!(frame_rx.recv().await, Some(Err(_))));
        reader.await.unwrap();
        assert_eq!(transport.read_count(), 1);
    }

    #[tokio::test]
    async fn test_reader_waits_for_resume() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_frame(b"one".to_vec())
                .with_frame(b"two".to_vec()),
        );
        let (frame_tx, mut frame_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);

        let reader = tokio::spawn(read_loop(transport.clone(), frame_tx, resume_rx));

        assert_eq!(frame_rx.recv().await.unwrap().unwrap(), b"one".to_vec());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(transport.read_count(), 1, "second read issued before resume");

        resume_tx.send(()).await.unwrap();
        assert_eq!(frame_rx.recv().await.unwrap().unwrap(), b"two".to_vec());

        drop(resume_tx);
        reader.await.unwrap();
    }
}
