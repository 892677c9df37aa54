//! Error types for the SignalR client
//!
//! Every public operation returns [`Result`]. Cancellation is reported as its
//! own variant so callers can tell "my stop interrupted this" apart from
//! "the server rejected this".

/// Main error type for connection operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Operation not allowed in the current connection state
    #[error("{0}")]
    InvalidState(String),

    /// Negotiation failed (server error, redirect limit, unsupported transport)
    #[error("{0}")]
    Negotiation(String),

    /// Connect/send/disconnect failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("transport timed out when trying to connect")]
    Timeout,

    /// Abandoned because a concurrent stop superseded the session
    #[error("the operation has been canceled")]
    Canceled,

    /// The owning connection was released while work was still in flight
    #[error("connection no longer exists")]
    ConnectionDropped,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// True when the operation was abandoned by a stop
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Http(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid URL: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
