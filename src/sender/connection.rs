//! Connection lifecycle: lazy open, connect timeout and reconnect cooldown.
//!
//! At most one connection is live at a time. Opening and closing run under a
//! single async lock so concurrent emitters never open duplicate connections
//! or close one halfway through an open. Writes do not take that lock; each
//! connection carries its own lock so payloads are never interleaved on the
//! socket.

use std::{io, sync::Arc};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use tokio::{
    sync::Mutex as AsyncMutex,
    time::{Duration, Instant, timeout},
};

use crate::error::SenderError;

use super::{
    state::ErrorState,
    transport::{Connection, ConnectionFactory, ForwardAddress},
};

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; the next send will try to open one.
    Closed,
    /// No connection; reconnects are suppressed until the cooldown ends.
    CoolingDown,
    /// A connection is open.
    Open,
}

pub(crate) type SharedConnection<C> = Arc<AsyncMutex<C>>;

pub(crate) struct ConnectionManager<F: ConnectionFactory> {
    factory: F,
    address: ForwardAddress,
    timeout: Duration,
    retry_timeout: Duration,
    slot: AsyncMutex<Option<SharedConnection<F::Connection>>>,
    errors: Mutex<ErrorState>,
}

impl<F: ConnectionFactory> ConnectionManager<F> {
    pub(crate) fn new(
        factory: F,
        address: ForwardAddress,
        timeout: Duration,
        retry_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            address,
            timeout,
            retry_timeout,
            slot: AsyncMutex::new(None),
            errors: Mutex::new(ErrorState::default()),
        }
    }

    pub(crate) fn address(&self) -> &ForwardAddress {
        &self.address
    }

    pub(crate) fn errors(&self) -> MutexGuard<'_, ErrorState> {
        self.errors.lock()
    }

    pub(crate) fn record_error(&self, error: SenderError) {
        self.errors.lock().record(error, Instant::now());
    }

    /// Return the open connection, opening one if allowed.
    ///
    /// Returns `None` without any I/O while cooling down after a failure, and
    /// `None` after recording the error when the open itself fails.
    pub(crate) async fn acquire_connection(&self) -> Option<SharedConnection<F::Connection>> {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Some(Arc::clone(connection));
        }

        let cooling = self.errors.lock().in_cooldown(Instant::now(), self.retry_timeout);
        if cooling {
            return None;
        }

        match timeout(self.timeout, self.factory.connect(&self.address)).await {
            Ok(Ok(connection)) => {
                debug!("FluentSender connected to {}", self.address);
                self.errors.lock().reset_count();
                let shared = Arc::new(AsyncMutex::new(connection));
                *slot = Some(Arc::clone(&shared));
                Some(shared)
            }
            Ok(Err(err)) => {
                warn!("FluentSender failed to connect to {}: {err}", self.address);
                self.record_error(SenderError::Connect(Arc::new(err)));
                None
            }
            Err(_) => {
                warn!("FluentSender timed out connecting to {}", self.address);
                self.record_error(SenderError::ConnectTimeout(self.timeout));
                None
            }
        }
    }

    /// Close the current connection, if any. Safe to call repeatedly.
    pub(crate) async fn release_connection(&self) {
        let mut slot = self.slot.lock().await;
        let Some(shared) = slot.take() else {
            return;
        };
        let mut connection = shared.lock().await;
        match timeout(self.timeout, connection.shutdown()).await {
            Ok(Ok(())) => debug!("FluentSender closed connection to {}", self.address),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotConnected => {}
            Ok(Err(err)) => debug!("FluentSender ignored error closing connection: {err}"),
            Err(_) => debug!("FluentSender timed out closing connection"),
        }
    }

    pub(crate) async fn state(&self) -> ConnectionState {
        if self.slot.lock().await.is_some() {
            return ConnectionState::Open;
        }
        let cooling = self.errors.lock().in_cooldown(Instant::now(), self.retry_timeout);
        if cooling {
            ConnectionState::CoolingDown
        } else {
            ConnectionState::Closed
        }
    }
}
