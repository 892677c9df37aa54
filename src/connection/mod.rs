//! Connection state machine
//!
//! A [`Connection`] moves through disconnected → connecting → connected →
//! disconnecting → disconnected and may be started again afterwards. The
//! atomic state is the single source of truth. A narrow async mutex guards
//! only the start/stop transition regions, and every session carries its own
//! cancellation token and generation number so that late work from a
//! superseded session can recognise itself and back off.

mod connect;
mod dispatch;
mod negotiation;
mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::logging::{LogWriter, Logger, TraceLevel};
use crate::negotiate::{HttpNegotiator, Negotiator};
use crate::transport::{Transport, TransportFactory, WebSocketTransportFactory};
use crate::types::{AtomicConnectionState, ClientError, ConnectionState, Result};

pub use dispatch::{DisconnectedCallback, MessageReceivedCallback};
pub use negotiation::MAX_NEGOTIATE_REDIRECTS;

use session::{Session, StartLatch};

/// How long `stop` waits for an in-flight start before logging and waiting again
const START_WAIT_SLICE: Duration = Duration::from_secs(60);

/// Identifiers of the current session, cleared on every start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub connection_id: String,
    pub message_id: String,
    pub groups_token: String,
}

/// Result of the shutdown phase of `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownOutcome {
    Completed,
    /// Another `stop` is already tearing the session down
    Superseded,
}

struct Callbacks {
    message_received: MessageReceivedCallback,
    disconnected: DisconnectedCallback,
}

pub(crate) struct ConnectionInner {
    base_url: String,
    state: AtomicConnectionState,
    logger: Logger,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    session: Mutex<Session>,
    generation: AtomicU64,
    start_latch: StartLatch,
    stop_lock: tokio::sync::Mutex<()>,
    ids: RwLock<SessionIds>,
    config: RwLock<ClientConfig>,
    callbacks: RwLock<Callbacks>,
    negotiator: Arc<dyn Negotiator>,
    transport_factory: Arc<dyn TransportFactory>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionInner {
    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Compare-and-swap transition; logs only when it happens
    fn try_change_state(
        &self,
        old: ConnectionState,
        new: ConnectionState,
    ) -> std::result::Result<(), ConnectionState> {
        self.state.compare_exchange(old, new)?;
        self.handle_state_change(old, new);
        Ok(())
    }

    fn change_state(&self, old: ConnectionState, new: ConnectionState) -> bool {
        self.try_change_state(old, new).is_ok()
    }

    /// Unconditional transition used on error paths
    fn force_state(&self, new: ConnectionState) -> ConnectionState {
        let old = self.state.swap(new);
        if old != new {
            self.handle_state_change(old, new);
        }
        old
    }

    fn handle_state_change(&self, old: ConnectionState, new: ConnectionState) {
        self.logger
            .log(TraceLevel::STATE_CHANGES, format!("{} -> {}", old, new));
    }

    fn current_session(&self) -> Session {
        lock(&self.session).clone()
    }

    /// True while `session` is the live, uncanceled session
    fn is_current(&self, session: &Session) -> bool {
        !session.is_canceled() && self.generation.load(Ordering::SeqCst) == session.generation
    }

    /// Reset per-session state. Called with the stop lock held.
    fn begin_session(&self) -> Session {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session::new(generation);
        let previous = std::mem::replace(&mut *lock(&self.session), session.clone());
        previous.token.cancel();

        self.start_latch.reset();
        *write(&self.ids) = SessionIds::default();
        session
    }

    /// Release the start latch on behalf of `session`. A pipeline that was
    /// superseded by a newer start leaves the newer session's latch alone.
    fn release_start_latch(&self, session: &Session) -> bool {
        if self.generation.load(Ordering::SeqCst) != session.generation {
            return false;
        }
        self.start_latch.set();
        true
    }

    fn transport_snapshot(&self) -> Option<Arc<dyn Transport>> {
        read(&self.transport).clone()
    }

    fn set_transport(&self, transport: Arc<dyn Transport>) {
        *write(&self.transport) = Some(transport);
    }

    fn take_transport(&self) -> Option<Arc<dyn Transport>> {
        write(&self.transport).take()
    }

    fn set_connection_id(&self, connection_id: String) {
        write(&self.ids).connection_id = connection_id;
    }

    fn client_config(&self) -> ClientConfig {
        read(&self.config).clone()
    }

    fn update_config(&self, update: impl FnOnce(&mut ClientConfig)) {
        update(&mut write(&self.config));
    }

    fn ensure_disconnected(&self, error_message: &str) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(ClientError::InvalidState(format!(
                "{}current connection state: {}",
                error_message, state
            )));
        }
        Ok(())
    }

    fn process_response(&self, response: &str) {
        self.logger.log(
            TraceLevel::MESSAGES,
            format!("processing message: {}", response),
        );

        let callback = Arc::clone(&read(&self.callbacks).message_received);
        dispatch::invoke_message_received(&self.logger, &callback, response);
    }

    fn invoke_disconnected(&self) {
        let callback = Arc::clone(&read(&self.callbacks).disconnected);
        dispatch::invoke_disconnected(&self.logger, &callback);
    }

    async fn shutdown(&self) -> Result<ShutdownOutcome> {
        let transport = {
            let _guard = self.stop_lock.lock().await;
            self.logger.log(TraceLevel::INFO, "acquired lock in shutdown()");

            match self.state() {
                ConnectionState::Disconnected => return Ok(ShutdownOutcome::Completed),
                ConnectionState::Disconnecting => return Ok(ShutdownOutcome::Superseded),
                _ => {}
            }

            // abandon any in-flight start and wait for it to unwind
            self.current_session().token.cancel();

            if !self.start_latch.is_set() {
                self.logger.log(
                    TraceLevel::INFO,
                    "waiting for the start operation to finish",
                );
            }
            while !self.start_latch.wait(START_WAIT_SLICE).await {
                self.logger.log(
                    TraceLevel::ERRORS,
                    "internal error - stopping the connection is still waiting for the start \
                     operation to finish which should have already finished or timed out",
                );
            }

            // a failed start has already cleared the transport
            if self.state() == ConnectionState::Disconnected {
                return Ok(ShutdownOutcome::Completed);
            }

            debug_assert_eq!(self.state(), ConnectionState::Connected);
            self.force_state(ConnectionState::Disconnecting);
            self.transport_snapshot()
        };

        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                self.logger.log(
                    TraceLevel::ERRORS,
                    format!("transport could not be disconnected due to: {}", e),
                );
                return Err(e);
            }
        }

        Ok(ShutdownOutcome::Completed)
    }

    /// Synchronous teardown for drop. Never panics.
    fn finalize(&self) {
        self.start_latch.set();
        self.current_session().token.cancel();

        let transport = self.take_transport();
        self.force_state(ConnectionState::Disconnected);

        let Some(transport) = transport else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let logger = self.logger.clone();
                handle.spawn(async move {
                    if let Err(e) = transport.disconnect().await {
                        if e.is_canceled() {
                            logger.log(
                                TraceLevel::ERRORS,
                                "internal error - disconnecting a released connection was canceled",
                            );
                            debug_assert!(false, "transport disconnect canceled during finalize");
                        } else {
                            logger.log(
                                TraceLevel::ERRORS,
                                format!("error disconnecting a released connection: {}", e),
                            );
                        }
                    }
                });
            }
            Err(_) => self.logger.log(
                TraceLevel::ERRORS,
                "no async runtime available, transport of a released connection was not disconnected",
            ),
        }
    }
}

/// Client connection to a SignalR endpoint.
///
/// The handle is the single owner of the connection. Background work holds
/// only weak references; dropping the handle cancels the current session and
/// detaches the transport.
///
/// # Example
///
/// ```rust,no_run
/// use signalr_client::Connection;
///
/// # async fn example() -> signalr_client::Result<()> {
/// let connection = Connection::new("http://localhost:5000/chat")?;
/// connection.set_message_received(|message| println!("{}", message))?;
///
/// connection.start().await?;
/// connection.send(r#"{"protocol":"json","version":1}"#).await?;
/// connection.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connection using the HTTP negotiator and the WebSocket transport
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::builder(url).build()
    }

    pub fn builder(url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Connection id of the current session; empty while connecting
    pub fn connection_id(&self) -> String {
        if self.inner.state() == ConnectionState::Connecting {
            return String::new();
        }
        read(&self.inner.ids).connection_id.clone()
    }

    /// Raw identifiers of the current session
    pub fn session_ids(&self) -> SessionIds {
        read(&self.inner.ids).clone()
    }

    pub fn client_config(&self) -> ClientConfig {
        self.inner.client_config()
    }

    pub fn set_client_config(&self, config: ClientConfig) -> Result<()> {
        self.inner.ensure_disconnected(
            "cannot set client config when the connection is not in the disconnected state. ",
        )?;
        *write(&self.inner.config) = config;
        Ok(())
    }

    pub fn set_message_received<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.ensure_disconnected(
            "cannot set the callback when the connection is not in the disconnected state. ",
        )?;
        write(&self.inner.callbacks).message_received = Arc::new(callback);
        Ok(())
    }

    pub fn set_disconnected<F>(&self, callback: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.ensure_disconnected(
            "cannot set the disconnected callback when the connection is not in the disconnected state. ",
        )?;
        write(&self.inner.callbacks).disconnected = Arc::new(callback);
        Ok(())
    }

    /// Negotiate with the server and connect the transport.
    ///
    /// Fails without side effects unless the connection is disconnected. Any
    /// later failure leaves the connection disconnected with no transport.
    pub async fn start(&self) -> Result<()> {
        let session = {
            let _guard = self.inner.stop_lock.lock().await;
            if let Err(state) = self
                .inner
                .try_change_state(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                return Err(ClientError::InvalidState(format!(
                    "cannot start a connection that is not in the disconnected state. \
                     current connection state: {}",
                    state
                )));
            }

            debug_assert!(self.inner.transport_snapshot().is_none());
            self.inner.begin_session()
        };

        // The pipeline runs detached so that dropping this future cannot
        // leave the connection stuck in `Connecting`.
        let connection = Arc::downgrade(&self.inner);
        let url = self.inner.base_url.clone();
        let pipeline = tokio::spawn(negotiation::run_start(connection, session, url));

        match pipeline.await {
            Ok(result) => result,
            Err(e) => {
                self.inner.logger.log(
                    TraceLevel::ERRORS,
                    format!("connection could not be started due to: {}", e),
                );
                let session = self.inner.current_session();
                session.token.cancel();
                self.inner.take_transport();
                self.inner.force_state(ConnectionState::Disconnected);
                self.inner.release_start_latch(&session);
                Err(ClientError::Internal(format!("start pipeline failed: {}", e)))
            }
        }
    }

    /// Stop the connection.
    ///
    /// A no-op when already disconnected. A call that overlaps another stop
    /// returns immediately and leaves the teardown to the first caller.
    pub async fn stop(&self) -> Result<()> {
        self.inner.logger.log(TraceLevel::INFO, "stopping connection");

        let outcome = self.inner.shutdown().await;
        if let Ok(ShutdownOutcome::Superseded) = outcome {
            self.inner.logger.log(
                TraceLevel::INFO,
                "stop skipped, another stop is already in progress",
            );
            return Ok(());
        }

        {
            // only the caller that performs the final transition may clear
            // the transport; a concurrent start must not be affected
            let _guard = self.inner.stop_lock.lock().await;
            if self
                .inner
                .change_state(ConnectionState::Disconnecting, ConnectionState::Disconnected)
            {
                self.inner.take_transport();
            }
        }

        self.inner.invoke_disconnected();
        outcome.map(|_| ())
    }

    /// Alias of [`Connection::stop`]
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await
    }

    pub async fn send(&self, data: &str) -> Result<()> {
        // snapshot first: the handle may be cleared by a concurrent stop
        let transport = self.inner.transport_snapshot();
        let state = self.inner.state();

        let transport = match transport {
            Some(transport) if state.is_connected() => transport,
            _ => {
                return Err(ClientError::InvalidState(format!(
                    "cannot send data when the connection is not in the connected state. \
                     current connection state: {}",
                    state
                )))
            }
        };

        self.inner
            .logger
            .log(TraceLevel::INFO, format!("sending data: {}", data));

        transport.send(data).await.map_err(|e| {
            self.inner
                .logger
                .log(TraceLevel::ERRORS, format!("error sending data: {}", e));
            e
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.finalize();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.base_url)
            .field("state", &self.inner.state())
            .finish()
    }
}

/// Builder for [`Connection`] with injectable collaborators
pub struct ConnectionBuilder {
    url: String,
    trace_level: TraceLevel,
    log_writer: Option<Arc<dyn LogWriter>>,
    config: ClientConfig,
    negotiator: Option<Arc<dyn Negotiator>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
}

impl ConnectionBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            trace_level: TraceLevel::ALL,
            log_writer: None,
            config: ClientConfig::default(),
            negotiator: None,
            transport_factory: None,
        }
    }

    pub fn trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    /// Log sink; defaults to `tracing`
    pub fn log_writer(mut self, writer: Arc<dyn LogWriter>) -> Self {
        self.log_writer = Some(writer);
        self
    }

    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn negotiator(mut self, negotiator: Arc<dyn Negotiator>) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<Connection> {
        url::Url::parse(&self.url)?;

        let logger = match self.log_writer {
            Some(writer) => Logger::new(writer, self.trace_level),
            None => Logger::tracing(self.trace_level),
        };

        let negotiator: Arc<dyn Negotiator> = match self.negotiator {
            Some(negotiator) => negotiator,
            None => Arc::new(HttpNegotiator::new()?),
        };

        let transport_factory: Arc<dyn TransportFactory> = match self.transport_factory {
            Some(factory) => factory,
            None => Arc::new(WebSocketTransportFactory),
        };

        let inner = ConnectionInner {
            base_url: self.url,
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            logger,
            transport: RwLock::new(None),
            session: Mutex::new(Session::new(0)),
            generation: AtomicU64::new(0),
            start_latch: StartLatch::new(),
            stop_lock: tokio::sync::Mutex::new(()),
            ids: RwLock::new(SessionIds::default()),
            config: RwLock::new(self.config),
            callbacks: RwLock::new(Callbacks {
                message_received: Arc::new(|_: &str| {}),
                disconnected: Arc::new(|| {}),
            }),
            negotiator,
            transport_factory,
        };

        Ok(Connection {
            inner: Arc::new(inner),
        })
    }
}
