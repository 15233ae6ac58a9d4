//! WebSocket transport backed by tokio-tungstenite.
//!
//! Holds one connection at a time. The stream is split so the handler's
//! reader task and orchestrating task never contend for the same half;
//! `close` cancels a per-connection token to unblock a pending read.

use crate::config::WebSocketConfig;
use crate::error::{WsError, WsResult};
use crate::transport::{BoxFuture, Transport};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as TungsteniteConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `Transport` over a single WebSocket connection.
pub struct WsTransport {
    config: WebSocketConfig,
    writer: TokioMutex<Option<SplitSink<WsStream, Message>>>,
    reader: TokioMutex<Option<SplitStream<WsStream>>>,
    /// Cancelled by `close`; replaced on every dial.
    shutdown: Mutex<CancellationToken>,
}

impl WsTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        Self {
            config,
            writer: TokioMutex::new(None),
            reader: TokioMutex::new(None),
            shutdown: Mutex::new(shutdown),
        }
    }

    fn tungstenite_config(&self) -> TungsteniteConfig {
        let mut config = TungsteniteConfig::default();
        config.write_buffer_size = self.config.write_buffer_size;
        config.max_message_size = Some(self.config.max_message_size);
        config
    }

    async fn send(&self, message: Message) -> WsResult<()> {
        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(WsError::NotConnected)?;

        tokio::time::timeout(self.config.write_timeout(), sink.send(message))
            .await
            .map_err(|_| WsError::Timeout {
                op: "write",
                after_ms: self.config.write_timeout_ms,
            })??;
        Ok(())
    }

    async fn dial_inner(&self, endpoint: &str) -> WsResult<()> {
        info!(endpoint, "Connecting to WebSocket");

        // TCP_NODELAY for lower latency
        let connect =
            connect_async_tls_with_config(endpoint, Some(self.tungstenite_config()), true, None);
        let (stream, response) = tokio::time::timeout(self.config.handshake_timeout(), connect)
            .await
            .map_err(|_| WsError::Timeout {
                op: "dial",
                after_ms: self.config.handshake_timeout_ms,
            })??;

        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        *self.shutdown.lock() = CancellationToken::new();

        info!(endpoint, status = %response.status(), "WebSocket connected");
        Ok(())
    }

    async fn read_inner(&self) -> WsResult<Vec<u8>> {
        let shutdown = self.shutdown.lock().clone();
        if shutdown.is_cancelled() {
            return Err(WsError::Closed);
        }

        let mut guard = self.reader.lock().await;
        let stream = guard.as_mut().ok_or(WsError::NotConnected)?;

        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(WsError::Closed),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received ping, sending pong");
                    self.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((1000, "Normal close".to_string()));
                    warn!(code, %reason, "WebSocket closed by server");
                    return Err(WsError::ConnectionClosed { code, reason });
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(WsError::ConnectionClosed {
                        code: 1006,
                        reason: "Stream ended".to_string(),
                    })
                }
            }
        }
    }

    async fn close_inner(&self) -> WsResult<()> {
        self.shutdown.lock().cancel();

        // Take the writer without holding its lock: a read answering a ping
        // may be waiting for it.
        let writer = self.writer.lock().await.take();
        let result = match writer {
            Some(mut sink) => {
                match tokio::time::timeout(self.config.write_timeout(), sink.close()).await {
                    Ok(result) => result.map_err(WsError::from),
                    Err(_) => Err(WsError::Timeout {
                        op: "close",
                        after_ms: self.config.write_timeout_ms,
                    }),
                }
            }
            None => Err(WsError::NotConnected),
        };

        self.reader.lock().await.take();
        debug!("WebSocket transport released");
        result
    }
}

impl Transport for WsTransport {
    fn dial<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(self.dial_inner(endpoint))
    }

    fn write<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, WsResult<()>> {
        Box::pin(async move {
            let message = match String::from_utf8(payload.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            };
            self.send(message).await
        })
    }

    fn read(&self) -> BoxFuture<'_, WsResult<Vec<u8>>> {
        Box::pin(self.read_inner())
    }

    fn close(&self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(self.close_inner())
    }
}
