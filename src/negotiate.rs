//! Negotiation wire types and the HTTP negotiator
//!
//! A negotiate round trip answers one of three ways: an error, a redirect to
//! another endpoint (optionally with an access token), or the connection id
//! together with the transports the server offers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ClientConfig;
use crate::transport::url::build_negotiate;
use crate::types::{ClientError, Result};

/// Transport offered by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Negotiate response body as sent by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
}

/// Interpretation of a [`NegotiationResponse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationResult {
    Error(String),
    Redirect {
        url: String,
        access_token: Option<String>,
    },
    Connect {
        connection_id: String,
        available_transports: Vec<AvailableTransport>,
    },
}

impl NegotiationResponse {
    /// Classify the response. An error wins over a redirect; empty strings
    /// count as absent.
    pub fn into_result(self) -> NegotiationResult {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.is_empty())
        }

        if let Some(error) = present(self.error) {
            return NegotiationResult::Error(error);
        }

        if let Some(url) = present(self.url) {
            return NegotiationResult::Redirect {
                url,
                access_token: present(self.access_token),
            };
        }

        NegotiationResult::Connect {
            connection_id: self.connection_id.unwrap_or_default(),
            available_transports: self.available_transports,
        }
    }
}

/// Performs one negotiate round trip.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn negotiate(&self, url: &str, config: &ClientConfig) -> Result<NegotiationResponse>;
}

/// Negotiator issuing `POST <url>/negotiate` with the configured headers
#[derive(Debug, Clone)]
pub struct HttpNegotiator {
    client: Client,
}

impl HttpNegotiator {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("signalr-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn negotiate(&self, url: &str, config: &ClientConfig) -> Result<NegotiationResponse> {
        let negotiate_url = build_negotiate(&Url::parse(url)?);

        let mut request = self
            .client
            .post(negotiate_url)
            .timeout(config.negotiate_timeout());
        for (name, value) in &config.http_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Http(format!(
                "negotiate request failed with status {}: {}",
                status, body
            )));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
