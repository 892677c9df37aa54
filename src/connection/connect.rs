//! Transport connect with a timeout race
//!
//! The transport's connect result and a fixed timeout both try to complete a
//! one-shot signal; whichever gets there first decides the outcome. Transport
//! callbacks carry the session they were created for and are dropped once
//! that session is no longer the live one.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use url::Url;

use super::session::Session;
use super::ConnectionInner;
use crate::logging::{Logger, TraceLevel};
use crate::transport::url::build_connect;
use crate::transport::{ErrorHandler, MessageHandler, Transport, TransportKind};
use crate::types::{ClientError, Result};

/// How long the transport gets to finish connecting
pub(crate) const TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// First-completion-wins signal for the connect outcome
struct ConnectSignal {
    tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl ConnectSignal {
    fn new(tx: oneshot::Sender<Result<()>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Returns false if the signal was already completed
    fn complete(&self, result: Result<()>) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// The connection, if `session` is still its live session
fn live(connection: &Weak<ConnectionInner>, session: &Session) -> Option<Arc<ConnectionInner>> {
    connection
        .upgrade()
        .filter(|inner| inner.is_current(session))
}

fn message_handler(
    connection: &Weak<ConnectionInner>,
    session: &Session,
    logger: &Logger,
) -> MessageHandler {
    let connection = connection.clone();
    let session = session.clone();
    let logger = logger.clone();

    Arc::new(move |message: String| match live(&connection, &session) {
        Some(inner) => inner.process_response(&message),
        None => logger.log(
            TraceLevel::INFO,
            format!(
                "ignoring stray message received after connection was restarted. message: {}",
                message
            ),
        ),
    })
}

fn error_handler(
    connection: &Weak<ConnectionInner>,
    session: &Session,
    logger: &Logger,
    signal: &Arc<ConnectSignal>,
) -> ErrorHandler {
    let connection = connection.clone();
    let session = session.clone();
    let logger = logger.clone();
    let signal = Arc::clone(signal);

    Arc::new(move |error: ClientError| {
        if live(&connection, &session).is_none() {
            logger.log(
                TraceLevel::INFO,
                format!(
                    "ignoring stray error received after connection was restarted. error: {}",
                    error
                ),
            );
            return;
        }

        let message = error.to_string();
        if !signal.complete(Err(error)) {
            logger.log(
                TraceLevel::ERRORS,
                format!("connection closed with error: {}", message),
            );
        }
    })
}

/// Create a transport for `kind` and connect it to the connect URL derived
/// from `url`, `connection_id` and the created transport's own kind. On failure the transport is disconnected
/// and discarded.
pub(crate) async fn start_transport(
    connection: &Weak<ConnectionInner>,
    session: &Session,
    kind: TransportKind,
    url: &str,
    connection_id: &str,
) -> Result<Arc<dyn Transport>> {
    let (tx, rx) = oneshot::channel();
    let signal = Arc::new(ConnectSignal::new(tx));

    let (transport, logger) = {
        let inner = connection.upgrade().ok_or(ClientError::ConnectionDropped)?;
        session.ensure_active()?;

        let logger = inner.logger.clone();
        let transport = inner.transport_factory.create_transport(
            kind,
            &logger,
            &inner.client_config(),
            message_handler(connection, session, &logger),
            error_handler(connection, session, &logger, &signal),
        )?;
        (transport, logger)
    };

    let kind = transport.transport_kind();
    let connect_url = build_connect(&Url::parse(url)?, kind, connection_id)?;

    let timeout_task = tokio::spawn({
        let signal = Arc::clone(&signal);
        let token = session.token.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(TRANSPORT_CONNECT_TIMEOUT) => {
                    if token.is_cancelled() {
                        signal.complete(Ok(()));
                    } else {
                        signal.complete(Err(ClientError::Timeout));
                    }
                }
                // resolve benignly so a concurrent stop is not held up
                _ = token.cancelled() => {
                    signal.complete(Ok(()));
                }
            }
        }
    });

    let connect_task = tokio::spawn({
        let signal = Arc::clone(&signal);
        let transport = Arc::clone(&transport);
        let logger = logger.clone();
        async move {
            match transport.connect(connect_url.as_str()).await {
                Ok(()) => {
                    signal.complete(Ok(()));
                }
                Err(e) => {
                    logger.log(
                        TraceLevel::ERRORS,
                        format!("transport could not connect due to: {}", e),
                    );
                    signal.complete(Err(e));
                }
            }
        }
    });

    let result = match rx.await {
        Ok(Ok(())) if session.is_canceled() => Err(ClientError::Canceled),
        Ok(result) => result,
        Err(_) => Err(ClientError::Internal("connect signal dropped".into())),
    };
    timeout_task.abort();

    match result {
        Ok(()) => {
            logger.log(
                TraceLevel::EVENTS,
                format!("{} transport connected", kind),
            );
            Ok(transport)
        }
        Err(e) => {
            connect_task.abort();
            if let Err(disconnect_error) = transport.disconnect().await {
                logger.log(
                    TraceLevel::ERRORS,
                    format!(
                        "error disconnecting transport after failed connect: {}",
                        disconnect_error
                    ),
                );
            }
            Err(e)
        }
    }
}
