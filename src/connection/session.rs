//! Session identity and the start-finished latch

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::{ClientError, Result};

/// Identity of one start-to-stop lifetime.
///
/// Every piece of asynchronous work spawned for a session carries a clone
/// and checks it before acting on the connection.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub token: CancellationToken,
    pub generation: u64,
}

impl Session {
    pub fn new(generation: u64) -> Self {
        Self {
            token: CancellationToken::new(),
            generation,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`ClientError::Canceled`] once the session was stopped
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_canceled() {
            Err(ClientError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Run `future` unless the session is canceled first
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ClientError::Canceled),
            output = future => Ok(output),
        }
    }
}

/// Boolean latch that `stop` waits on until the start pipeline has exited.
#[derive(Debug)]
pub(crate) struct StartLatch {
    tx: watch::Sender<bool>,
}

impl StartLatch {
    /// A latch that starts out set (nothing in flight)
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait up to `timeout` for the latch. Returns false if it is still unset.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await;
        matches!(result, Ok(Ok(_)))
    }
}
