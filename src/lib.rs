//! SignalR client - connection core
//!
//! Negotiates with a SignalR endpoint over HTTP, follows redirects, connects
//! the WebSocket transport and relays raw string messages in both directions.
//! Hub protocol framing is left to the caller.

pub mod config;
pub mod connection;
pub mod logging;
pub mod negotiate;
pub mod transport;
pub mod types;

pub use config::{Args, ClientConfig, WebSocketOptions};
pub use connection::{
    Connection, ConnectionBuilder, DisconnectedCallback, MessageReceivedCallback, SessionIds,
    MAX_NEGOTIATE_REDIRECTS,
};
pub use logging::{init_tracing, LogWriter, Logger, TraceLevel, TracingLogWriter};
pub use negotiate::{
    AvailableTransport, HttpNegotiator, NegotiationResponse, NegotiationResult, Negotiator,
};
pub use transport::{Transport, TransportFactory, TransportKind};
pub use types::{ClientError, ConnectionState, Result};
