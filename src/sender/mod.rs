//! Forward Protocol sender.
//!
//! This module defines [`FluentSender`], which serialises events into
//! Forward Protocol packets and writes them to a collector over a persistent
//! connection. Undelivered bytes are kept in a capped in-memory backlog and
//! resent ahead of the next event; after a failure, reconnects are suppressed
//! for a cooldown window so a dead collector is not hammered.
//!
//! # Failure handling
//!
//! - **Connect failures** (error or timeout) are recorded and start the
//!   cooldown.
//! - **Transport failures** while writing close the connection immediately;
//!   the payload stays buffered.
//! - **Internal failures** reported by the connection are counted; the
//!   connection is only closed once the count exceeds the configured limit.
//! - **Backlog overflow** hands the whole backlog to the overflow handler and
//!   drops it.
//!
//! None of these surface as errors from the emit API, which only returns
//! whether the data reached the socket.

mod config;
mod connection;
mod handler;
mod overflow;
mod state;
mod transport;
mod unsent;


pub use config::{
    DEFAULT_BUFMAX, DEFAULT_ERROR_COUNT_LIMIT, DEFAULT_RETRY_TIMEOUT, DEFAULT_TIMEOUT,
    DEFAULT_WARN_INTERVAL, SenderBuilder, SenderConfig, SenderSettings,
};
pub use connection::ConnectionState;
pub use handler::FluentSender;
pub use overflow::OverflowHandler;
pub use state::{Coalesced, ErrorState, PendingBuffer};
pub use transport::{
    Connection, ConnectionFactory, DEFAULT_HOST, DEFAULT_PORT, ForwardAddress, TcpConnection,
    TcpConnector, WriteError,
};
pub use unsent::UnsentWarner;
