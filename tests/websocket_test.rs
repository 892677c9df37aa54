//! WebSocket transport integration tests
//!
//! Runs the transport, and a full connection, against a local echo server
//! built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use signalr_client::transport::{ErrorHandler, MessageHandler, WebSocketTransport};
use signalr_client::{
    AvailableTransport, ClientConfig, ClientError, Connection, ConnectionState, Logger,
    NegotiationResponse, Negotiator, Result, TraceLevel, Transport,
};

#[derive(Debug, Clone, Default)]
struct Handshake {
    uri: String,
    api_key: Option<String>,
}

/// Echo server for a single client. Replies `echo: <text>`, closes the
/// socket on `close`, and on `ping me` sends a ping whose pong it reports
/// back as `pong: <payload>`.
async fn echo_server() -> (String, Arc<Mutex<Handshake>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handshake = Arc::new(Mutex::new(Handshake::default()));
    let seen = Arc::clone(&handshake);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record = move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            let mut seen = seen.lock().unwrap();
            seen.uri = req.uri().to_string();
            seen.api_key = req
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, record)
            .await
            .unwrap();

        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) if text == "close" => {
                    let _ = ws.close(None).await;
                    break;
                }
                Message::Text(text) if text == "ping me" => {
                    if ws.send(Message::Ping(b"hb".to_vec())).await.is_err() {
                        break;
                    }
                }
                Message::Pong(payload) => {
                    let reply = format!("pong: {}", String::from_utf8_lossy(&payload));
                    if ws.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => {
                    if ws.send(Message::Text(format!("echo: {}", text))).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    (format!("127.0.0.1:{}", addr.port()), handshake)
}

fn channel_handlers() -> (
    MessageHandler,
    ErrorHandler,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedReceiver<ClientError>,
) {
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let on_message: MessageHandler = Arc::new(move |message: String| {
        let _ = message_tx.send(message);
    });
    let on_error: ErrorHandler = Arc::new(move |error: ClientError| {
        let _ = error_tx.send(error);
    });
    (on_message, on_error, message_rx, error_rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for the server")
        .expect("channel closed")
}

#[tokio::test]
async fn test_transport_round_trip() {
    let (host, handshake) = echo_server().await;
    let (on_message, on_error, mut messages, _errors) = channel_handlers();

    let mut config = ClientConfig::default();
    config
        .http_headers
        .insert("X-Api-Key".to_string(), "k-123".to_string());
    let transport = WebSocketTransport::new(
        Logger::tracing(TraceLevel::NONE),
        &config,
        on_message,
        on_error,
    );

    let err = assert_err!(transport.send("too early").await);
    assert_eq!(err.to_string(), "Transport error: transport is not connected");

    assert_ok!(transport.connect(&format!("ws://{}/chat?id=abc", host)).await);
    assert_ok!(transport.send("hello").await);

    assert_eq!(next(&mut messages).await, "echo: hello");

    let seen = handshake.lock().unwrap().clone();
    assert_eq!(seen.uri, "/chat?id=abc");
    assert_eq!(seen.api_key.as_deref(), Some("k-123"));

    assert_ok!(transport.disconnect().await);
    assert!(transport.send("after").await.is_err());
}

#[tokio::test]
async fn test_server_close_reports_error() {
    let (host, _handshake) = echo_server().await;
    let (on_message, on_error, _messages, mut errors) = channel_handlers();
    let transport = WebSocketTransport::new(
        Logger::tracing(TraceLevel::NONE),
        &ClientConfig::default(),
        on_message,
        on_error,
    );

    assert_ok!(transport.connect(&format!("ws://{}/chat", host)).await);
    assert_ok!(transport.send("close").await);

    let error = next(&mut errors).await;
    assert!(matches!(error, ClientError::Transport(_)), "unexpected error: {:?}", error);
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let (host, _handshake) = echo_server().await;
    let (on_message, on_error, mut messages, _errors) = channel_handlers();
    let transport = WebSocketTransport::new(
        Logger::tracing(TraceLevel::NONE),
        &ClientConfig::default(),
        on_message,
        on_error,
    );

    assert_ok!(transport.connect(&format!("ws://{}/chat", host)).await);
    assert_ok!(transport.send("ping me").await);

    assert_eq!(next(&mut messages).await, "pong: hb");
    assert_ok!(transport.disconnect().await);
}

#[tokio::test]
async fn test_connect_after_disconnect_is_canceled() {
    let (host, _handshake) = echo_server().await;
    let (on_message, on_error, _messages, _errors) = channel_handlers();
    let transport = WebSocketTransport::new(
        Logger::tracing(TraceLevel::NONE),
        &ClientConfig::default(),
        on_message,
        on_error,
    );

    assert_ok!(transport.disconnect().await);

    let err = assert_err!(transport.connect(&format!("ws://{}/chat", host)).await);
    assert!(err.is_canceled());
    assert!(transport.send("hello").await.is_err());
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (on_message, on_error, _messages, _errors) = channel_handlers();
    let transport = WebSocketTransport::new(
        Logger::tracing(TraceLevel::NONE),
        &ClientConfig::default(),
        on_message,
        on_error,
    );

    let err = assert_err!(transport.connect(&format!("ws://{}/chat", addr)).await);
    assert!(matches!(err, ClientError::WebSocket(_)));
}

struct FixedNegotiator;

#[async_trait]
impl Negotiator for FixedNegotiator {
    async fn negotiate(&self, _url: &str, _config: &ClientConfig) -> Result<NegotiationResponse> {
        Ok(NegotiationResponse {
            connection_id: Some("conn-1".into()),
            available_transports: vec![AvailableTransport {
                transport: "WebSockets".into(),
                transfer_formats: vec!["Text".into()],
            }],
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_connection_over_websocket() {
    let (host, handshake) = echo_server().await;
    let connection = Connection::builder(format!("http://{}/chat", host))
        .negotiator(Arc::new(FixedNegotiator))
        .trace_level(TraceLevel::NONE)
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert_ok!(connection.set_message_received(move |message| {
        let _ = tx.send(message.to_string());
    }));

    assert_ok!(connection.start().await);
    assert_eq!(connection.connection_state(), ConnectionState::Connected);
    assert_eq!(handshake.lock().unwrap().uri, "/chat?id=conn-1");

    assert_ok!(connection.send("hi").await);
    assert_eq!(next(&mut rx).await, "echo: hi");

    assert_ok!(connection.stop().await);
    assert_eq!(connection.connection_state(), ConnectionState::Disconnected);
}
