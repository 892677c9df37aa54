//! Start pipeline: negotiate, follow redirects, pick the transport, connect

use std::sync::{Arc, Weak};

use super::connect;
use super::session::Session;
use super::ConnectionInner;
use crate::logging::TraceLevel;
use crate::negotiate::{AvailableTransport, NegotiationResponse, NegotiationResult};
use crate::transport::TransportKind;
use crate::types::{ClientError, ConnectionState, Result};

/// Number of negotiate redirects followed before giving up
pub const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Run the whole start pipeline for `session` and settle the connection
/// state. Always releases the start latch before returning.
pub(crate) async fn run_start(
    connection: Weak<ConnectionInner>,
    session: Session,
    url: String,
) -> Result<()> {
    let result = negotiate_and_connect(&connection, &session, url).await;

    let Some(inner) = connection.upgrade() else {
        return result.and(Err(ClientError::ConnectionDropped));
    };

    match result {
        Ok(()) => {
            inner.release_start_latch(&session);
            Ok(())
        }
        Err(e) => {
            if e.is_canceled() {
                inner.logger.log(
                    TraceLevel::INFO,
                    "starting the connection has been canceled.",
                );
            } else {
                inner.logger.log(
                    TraceLevel::ERRORS,
                    format!("connection could not be started due to: {}", e),
                );
            }

            // late transport callbacks of this session are stale from here on
            session.token.cancel();
            inner.take_transport();
            inner.force_state(ConnectionState::Disconnected);
            inner.release_start_latch(&session);
            Err(e)
        }
    }
}

fn upgrade(connection: &Weak<ConnectionInner>) -> Result<Arc<ConnectionInner>> {
    connection.upgrade().ok_or(ClientError::ConnectionDropped)
}

async fn negotiate_and_connect(
    connection: &Weak<ConnectionInner>,
    session: &Session,
    mut url: String,
) -> Result<()> {
    let mut redirects = 0;

    let (connection_id, transports) = loop {
        if redirects >= MAX_NEGOTIATE_REDIRECTS {
            return Err(ClientError::Negotiation(
                "Negotiate redirection limit exceeded.".into(),
            ));
        }

        let response = negotiate(connection, session, &url).await?;
        let inner = upgrade(connection)?;
        session.ensure_active()?;

        match response.into_result() {
            NegotiationResult::Error(error) => return Err(ClientError::Negotiation(error)),
            NegotiationResult::Redirect {
                url: redirect,
                access_token,
            } => {
                inner.logger.log(
                    TraceLevel::INFO,
                    format!("negotiate redirected to: {}", redirect),
                );
                if let Some(token) = access_token {
                    inner.update_config(|config| config.set_bearer_token(&token));
                }
                url = redirect;
                redirects += 1;
            }
            NegotiationResult::Connect {
                connection_id,
                available_transports,
            } => break (connection_id, available_transports),
        }
    };

    let inner = upgrade(connection)?;
    inner.set_connection_id(connection_id.clone());

    let kind = TransportKind::WebSockets;
    if !supports(&transports, kind) {
        return Err(ClientError::Negotiation(
            "The server does not support WebSockets which is currently the only transport \
             supported by this client."
                .into(),
        ));
    }
    drop(inner);

    let transport = connect::start_transport(connection, session, kind, &url, &connection_id).await?;

    let inner = match upgrade(connection) {
        Ok(inner) => inner,
        Err(e) => {
            if let Err(disconnect_error) = transport.disconnect().await {
                tracing::debug!("error disconnecting transport of a released connection: {}", disconnect_error);
            }
            return Err(e);
        }
    };

    // stop may have run while the transport was connecting
    if session.ensure_active().is_err() {
        if let Err(e) = transport.disconnect().await {
            inner.logger.log(
                TraceLevel::ERRORS,
                format!("error disconnecting a canceled transport: {}", e),
            );
        }
        return Err(ClientError::Canceled);
    }

    inner.set_transport(transport);

    if let Err(state) =
        inner.try_change_state(ConnectionState::Connecting, ConnectionState::Connected)
    {
        inner.logger.log(
            TraceLevel::ERRORS,
            format!(
                "internal error - transition from an unexpected state. expected state: {}, \
                 actual state: {}",
                ConnectionState::Connecting,
                state
            ),
        );
        debug_assert!(false, "unexpected state {} when finishing start", state);
    }

    Ok(())
}

async fn negotiate(
    connection: &Weak<ConnectionInner>,
    session: &Session,
    url: &str,
) -> Result<NegotiationResponse> {
    let (negotiator, config, logger) = {
        let inner = upgrade(connection)?;
        session.ensure_active()?;
        (
            Arc::clone(&inner.negotiator),
            inner.client_config(),
            inner.logger.clone(),
        )
    };

    logger.log(TraceLevel::INFO, format!("negotiating with: {}", url));

    match session.run(negotiator.negotiate(url, &config)).await? {
        Ok(response) => Ok(response),
        Err(ClientError::Canceled) => Err(ClientError::Canceled),
        Err(ClientError::Negotiation(message)) => Err(ClientError::Negotiation(message)),
        Err(e) => Err(ClientError::Negotiation(e.to_string())),
    }
}

fn supports(transports: &[AvailableTransport], kind: TransportKind) -> bool {
    transports.iter().any(|t| t.transport == kind.as_str())
}
