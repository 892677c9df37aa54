//! Configuration for the client
//!
//! [`ClientConfig`] is the per-connection configuration consumed by the
//! negotiator and the transport. [`Args`] is the CLI surface of the demo
//! binary, using clap with environment variable fallbacks.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::logging::TraceLevel;

/// Options applied to the WebSocket transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketOptions {
    /// Largest incoming message accepted, in bytes (library default if unset)
    pub max_message_size: Option<usize>,
    /// Largest incoming frame accepted, in bytes (library default if unset)
    pub max_frame_size: Option<usize>,
}

/// Connection configuration: HTTP headers and transport options.
///
/// Mutable only while the connection is disconnected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Headers sent with the negotiate request and the WebSocket upgrade
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    /// Timeout for a single negotiate round trip, in milliseconds
    #[serde(default = "default_negotiate_timeout_ms")]
    pub negotiate_timeout_ms: u64,
    #[serde(default)]
    pub websocket: WebSocketOptions,
}

fn default_negotiate_timeout_ms() -> u64 {
    30000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_headers: BTreeMap::new(),
            negotiate_timeout_ms: default_negotiate_timeout_ms(),
            websocket: WebSocketOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Set `Authorization: Bearer <token>`, replacing any existing
    /// Authorization header regardless of its casing.
    pub fn set_bearer_token(&mut self, token: &str) {
        self.http_headers
            .retain(|name, _| !name.eq_ignore_ascii_case("authorization"));
        self.http_headers
            .insert("Authorization".to_string(), format!("Bearer {}", token));
    }

    pub fn negotiate_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiate_timeout_ms)
    }
}

/// signalr-client - connect to a SignalR endpoint and relay raw messages
#[derive(Parser, Debug, Clone)]
#[command(name = "signalr-client")]
#[command(about = "Connect to a SignalR endpoint, print incoming messages and send stdin lines")]
pub struct Args {
    /// Base URL of the SignalR endpoint (e.g. http://localhost:5000/chat)
    #[arg(env = "SIGNALR_URL")]
    pub url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Comma-separated connection trace categories
    /// (messages, events, state_changes, errors, info, all, none)
    #[arg(long, env = "SIGNALR_TRACE", default_value = "all")]
    pub trace: String,

    /// Extra HTTP header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Bearer token sent with the negotiate request
    #[arg(long, env = "SIGNALR_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Negotiate request timeout in milliseconds
    #[arg(long, env = "NEGOTIATE_TIMEOUT_MS", default_value = "30000")]
    pub negotiate_timeout_ms: u64,
}

impl Args {
    /// Parsed connection trace mask
    pub fn trace_level(&self) -> Result<TraceLevel, String> {
        TraceLevel::parse_list(&self.trace)
    }

    /// Build the connection configuration from the arguments
    pub fn client_config(&self) -> Result<ClientConfig, String> {
        let mut config = ClientConfig {
            negotiate_timeout_ms: self.negotiate_timeout_ms,
            ..Default::default()
        };

        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            config.http_headers.insert(name, value);
        }

        if let Some(ref token) = self.access_token {
            config.set_bearer_token(token);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.url).map_err(|e| format!("invalid URL '{}': {}", self.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("URL scheme must be http or https, got '{}'", url.scheme()));
        }

        if self.negotiate_timeout_ms == 0 {
            return Err("NEGOTIATE_TIMEOUT_MS must be greater than zero".to_string());
        }

        self.trace_level()?;
        self.client_config()?;
        Ok(())
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header '{}' must look like 'Name: value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header '{}' has an empty name", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
