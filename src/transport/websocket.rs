//! WebSocket transport
//!
//! Opens the socket with the configured HTTP headers, then runs a receive
//! pump that forwards text frames to the message handler and failures to the
//! error handler until the transport is disconnected or dropped.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{ErrorHandler, MessageHandler, Transport, TransportFactory, TransportKind};
use crate::config::{ClientConfig, WebSocketOptions};
use crate::logging::{Logger, TraceLevel};
use crate::types::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// WebSocket implementation of [`Transport`]
pub struct WebSocketTransport {
    logger: Logger,
    headers: BTreeMap<String, String>,
    options: WebSocketOptions,
    on_message: MessageHandler,
    on_error: ErrorHandler,
    sink: Arc<Mutex<Option<WsSink>>>,
    shutdown: CancellationToken,
}

impl WebSocketTransport {
    pub fn new(
        logger: Logger,
        config: &ClientConfig,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Self {
        Self {
            logger,
            headers: config.http_headers.clone(),
            options: config.websocket.clone(),
            on_message,
            on_error,
            sink: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(size) = self.options.max_message_size {
            config.max_message_size = Some(size);
        }
        if let Some(size) = self.options.max_frame_size {
            config.max_frame_size = Some(size);
        }
        config
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<()> {
        if self.sink.lock().await.is_some() {
            return Err(ClientError::Transport("transport is already connected".into()));
        }

        let mut request = url.into_client_request()?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Config(format!("invalid value for header '{}': {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        self.logger
            .log(TraceLevel::EVENTS, format!("[websocket transport] connecting to: {}", url));

        let (ws, _response) =
            connect_async_with_config(request, Some(self.websocket_config()), false).await?;
        let (mut sink, stream) = ws.split();

        if self.shutdown.is_cancelled() {
            if let Err(e) = sink.close().await {
                self.logger.log(
                    TraceLevel::ERRORS,
                    format!("[websocket transport] error closing canceled connection: {}", e),
                );
            }
            return Err(ClientError::Canceled);
        }

        *self.sink.lock().await = Some(sink);

        tokio::spawn(receive_loop(
            stream,
            Arc::clone(&self.sink),
            Arc::clone(&self.on_message),
            Arc::clone(&self.on_error),
            self.shutdown.clone(),
            self.logger.clone(),
        ));

        Ok(())
    }

    async fn send(&self, data: &str) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ClientError::Transport("transport is not connected".into()))?;

        sink.send(Message::Text(data.to_string())).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shutdown.cancel();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            self.logger
                .log(TraceLevel::EVENTS, "[websocket transport] closing connection");
            if let Err(e) = sink.send(Message::Close(None)).await {
                self.logger.log(
                    TraceLevel::ERRORS,
                    format!("[websocket transport] error sending close frame: {}", e),
                );
            }
            sink.close().await?;
        }

        Ok(())
    }

    fn transport_kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Forward inbound frames until shutdown or the socket ends
async fn receive_loop(
    mut stream: SplitStream<WsStream>,
    sink: Arc<Mutex<Option<WsSink>>>,
    on_message: MessageHandler,
    on_error: ErrorHandler,
    shutdown: CancellationToken,
    logger: Logger,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => on_message(text),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => on_message(text),
                Err(_) => logger.log(
                    TraceLevel::ERRORS,
                    "[websocket transport] dropping binary message that is not valid UTF-8",
                ),
            },
            Some(Ok(Message::Ping(_))) => {
                // tungstenite queues the pong; flushing the sink writes it out
                if let Some(sink) = sink.lock().await.as_mut() {
                    if let Err(e) = sink.flush().await {
                        logger.log(
                            TraceLevel::ERRORS,
                            format!("[websocket transport] error answering ping: {}", e),
                        );
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                if !shutdown.is_cancelled() {
                    on_error(ClientError::Transport(format!(
                        "connection closed by the server: {:?}",
                        frame
                    )));
                }
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if !shutdown.is_cancelled() {
                    on_error(e.into());
                }
                break;
            }
            None => {
                if !shutdown.is_cancelled() {
                    on_error(ClientError::Transport("connection closed".into()));
                }
                break;
            }
        }
    }

    tracing::debug!("WebSocket receive loop ended");
}

/// Factory for [`WebSocketTransport`]
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create_transport(
        &self,
        kind: TransportKind,
        logger: &Logger,
        config: &ClientConfig,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<Arc<dyn Transport>> {
        match kind {
            TransportKind::WebSockets => Ok(Arc::new(WebSocketTransport::new(
                logger.clone(),
                config,
                on_message,
                on_error,
            ))),
        }
    }
}
