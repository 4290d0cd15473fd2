//! Public sender type exported by the crate.

use std::{fmt, sync::Arc};

use log::{error, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Duration, Instant, timeout};

use crate::{
    error::SenderError,
    event_time::EventTime,
    packet::{BuiltPacket, PacketBuilder},
};

use super::{
    config::{SenderBuilder, SenderConfig},
    connection::{ConnectionManager, ConnectionState},
    overflow::OverflowHandler,
    state::{Coalesced, PendingBuffer},
    transport::{Connection, ConnectionFactory, ForwardAddress, TcpConnector, WriteError},
    unsent::UnsentWarner,
};

/// Ships Forward Protocol events to a Fluentd-compatible collector.
///
/// Every emit returns a plain `bool`: failures are buffered for the next
/// send and recorded for inspection via [`last_error`](Self::last_error),
/// never raised to the caller. Share one sender between tasks through an
/// [`Arc`].
pub struct FluentSender<F: ConnectionFactory = TcpConnector> {
    packets: PacketBuilder,
    connections: ConnectionManager<F>,
    pending: Mutex<PendingBuffer>,
    bufmax: usize,
    timeout: Duration,
    error_count_limit: u32,
    log_unhandled_exceptions: bool,
    overflow_handler: Option<OverflowHandler>,
    unsent: UnsentWarner,
}

impl FluentSender {
    /// Start building a sender for `tag`.
    pub fn builder(tag: impl Into<String>) -> SenderBuilder {
        SenderBuilder::new(tag)
    }
}

impl<F: ConnectionFactory> FluentSender<F> {
    pub(crate) fn from_config(config: SenderConfig, factory: F) -> Self {
        let unsent = UnsentWarner::new(
            format!("FluentSender({} -> {})", config.tag, config.address),
            config.warn_interval,
        );
        Self {
            packets: PacketBuilder::new(config.tag, config.packer).with_verbose(config.verbose),
            connections: ConnectionManager::new(
                factory,
                config.address,
                config.timeout,
                config.retry_timeout,
            ),
            pending: Mutex::new(PendingBuffer::default()),
            bufmax: config.bufmax,
            timeout: config.timeout,
            error_count_limit: config.error_count_limit,
            log_unhandled_exceptions: config.log_unhandled_exceptions,
            overflow_handler: config.overflow_handler,
            unsent,
        }
    }

    /// Base tag prefixed to every event.
    pub fn tag(&self) -> &str {
        self.packets.base_tag()
    }

    /// Collector address.
    pub fn address(&self) -> &ForwardAddress {
        self.connections.address()
    }

    /// Emit `record` under `label`, timestamped now.
    pub async fn emit<R: Serialize + ?Sized>(&self, label: &str, record: &R) -> bool {
        self.emit_with_time(label, EventTime::now(), record).await
    }

    /// Emit `record` under `label` at a floating-point Unix `timestamp`.
    pub async fn emit_at<R: Serialize + ?Sized>(
        &self,
        label: &str,
        record: &R,
        timestamp: f64,
    ) -> bool {
        self.emit_with_time(label, EventTime::from_timestamp(timestamp), record)
            .await
    }

    /// Emit `record` under `label` at `time`.
    ///
    /// A record that cannot be serialised is replaced by a CRITICAL
    /// diagnostic record describing the failure, so the event slot is never
    /// silently lost.
    pub async fn emit_with_time<R: Serialize + ?Sized>(
        &self,
        label: &str,
        time: EventTime,
        record: &R,
    ) -> bool {
        let bytes = match self.packets.build_or_diagnostic(label, time, record) {
            Ok(BuiltPacket::Record(bytes)) => bytes,
            Ok(BuiltPacket::Diagnostic { bytes, error }) => {
                warn!("FluentSender could not serialise record for {label:?}: {error}");
                self.connections
                    .record_error(SenderError::Serialization(error.to_string()));
                bytes
            }
            Err(err) => {
                error!("FluentSender could not serialise diagnostic record: {err}");
                self.connections
                    .record_error(SenderError::Serialization(err.to_string()));
                return false;
            }
        };
        self.send(bytes).await
    }

    /// Send pre-encoded packet bytes, together with any backlog.
    ///
    /// Returns `true` once everything buffered so far has been flushed to
    /// the collector.
    pub async fn send(&self, bytes: Vec<u8>) -> bool {
        let attempt = self.pending.lock().coalesce(bytes);

        let Some(connection) = self.connections.acquire_connection().await else {
            self.hold_back(attempt);
            return false;
        };

        let result = {
            let mut connection = connection.lock().await;
            timeout(self.timeout, connection.write_all_and_flush(&attempt.payload)).await
        };

        match result {
            Ok(Ok(())) => {
                let mut errors = self.connections.errors();
                errors.clear();
                errors.reset_count();
                true
            }
            Ok(Err(WriteError::Transport(err))) => {
                self.transport_failure(SenderError::Transport(Arc::new(err)), attempt)
                    .await
            }
            Err(_) => {
                self.transport_failure(SenderError::WriteTimeout(self.timeout), attempt)
                    .await
            }
            Ok(Err(WriteError::Internal(message))) => {
                self.internal_failure(SenderError::Internal(message), attempt)
                    .await
            }
        }
    }

    async fn transport_failure(&self, error: SenderError, attempt: Coalesced) -> bool {
        warn!("FluentSender write to {} failed: {error}", self.address());
        self.connections.record_error(error);
        self.hold_back(attempt);
        self.connections.release_connection().await;
        false
    }

    async fn internal_failure(&self, error: SenderError, attempt: Coalesced) -> bool {
        let count = self.connections.errors().increment();
        warn!("FluentSender unhandled exception sending data ({count} consecutive)");
        if self.log_unhandled_exceptions {
            warn!("FluentSender unhandled exception detail: {error:?}");
        }
        self.connections.record_error(error);
        self.hold_back(attempt);
        if count > self.error_count_limit {
            warn!(
                "FluentSender closing connection after {count} errors (limit {})",
                self.error_count_limit
            );
            self.connections.release_connection().await;
        }
        false
    }

    /// Keep an undelivered attempt for the next send and report it.
    fn hold_back(&self, attempt: Coalesced) {
        let (discarded, backlog) = {
            let mut pending = self.pending.lock();
            let discarded = pending.buffer_or_overflow(attempt, self.bufmax);
            (discarded, pending.len())
        };
        self.unsent.record_unsent(backlog, self.last_error().as_ref());
        if let Some(discarded) = discarded {
            warn!(
                "FluentSender backlog exceeded {} bytes; discarding {} bytes",
                self.bufmax,
                discarded.len()
            );
            if let Some(handler) = &self.overflow_handler {
                handler.call(&discarded);
            }
        }
    }

    /// Close the connection. The next send reconnects. Safe to call
    /// repeatedly.
    pub async fn close(&self) {
        self.connections.release_connection().await;
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        self.connections.state().await
    }

    /// Most recent failure, if any.
    pub fn last_error(&self) -> Option<SenderError> {
        self.connections.errors().last_error().cloned()
    }

    /// When the most recent failure was observed.
    pub fn last_error_at(&self) -> Option<Instant> {
        self.connections.errors().last_error_at()
    }

    /// Forget the last error, ending any reconnect cooldown.
    pub fn clear_last_error(&self) {
        self.connections.errors().clear();
    }

    /// Consecutive internal failures since the last success.
    pub fn error_count(&self) -> u32 {
        self.connections.errors().error_count()
    }

    /// Bytes buffered for the next send.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// A copy of the buffered bytes, if any.
    pub fn pending_bytes(&self) -> Option<Vec<u8>> {
        self.pending.lock().contents()
    }
}

impl<F: ConnectionFactory> fmt::Debug for FluentSender<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluentSender")
            .field("tag", &self.tag())
            .field("address", self.address())
            .field("bufmax", &self.bufmax)
            .field("timeout", &self.timeout)
            .finish()
    }
}
