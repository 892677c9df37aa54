//! Transport abstraction
//!
//! The connection core only talks to [`Transport`] and [`TransportFactory`].
//! [`websocket`] provides the default implementation.

pub mod url;
pub mod websocket;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::logging::Logger;
use crate::types::{ClientError, Result};

pub use websocket::{WebSocketTransport, WebSocketTransportFactory};

/// Kinds of transport the protocol defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSockets,
}

impl TransportKind {
    /// Name used in the negotiate response's `availableTransports`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSockets => "WebSockets",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called with every inbound text message
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Called when the transport fails
pub type ErrorHandler = Arc<dyn Fn(ClientError) + Send + Sync>;

/// A connected (or connectable) bidirectional channel
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<()>;

    async fn send(&self, data: &str) -> Result<()>;

    /// Close the channel. Must be safe to call on a transport that never
    /// finished connecting.
    async fn disconnect(&self) -> Result<()>;

    fn transport_kind(&self) -> TransportKind;
}

/// Creates transports wired to the connection's callbacks
pub trait TransportFactory: Send + Sync {
    fn create_transport(
        &self,
        kind: TransportKind,
        logger: &Logger,
        config: &ClientConfig,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<Arc<dyn Transport>>;
}
