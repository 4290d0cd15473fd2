//! Fluentd Forward Protocol sender.
//!
//! Events are `(tag, time, record)` triples packed with MessagePack and
//! written to a collector over TCP. [`FluentSender`] owns the connection,
//! buffers undelivered bytes, rate-limits reconnects and never surfaces a
//! failure to the emitting code beyond a `bool`.
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! use fluent_sender::FluentSender;
//!
//! # async fn run() -> Result<(), fluent_sender::SenderBuildError> {
//! let sender = FluentSender::builder("app").build()?;
//! let delivered = sender
//!     .emit("access", &BTreeMap::from([("code", 200)]))
//!     .await;
//! if !delivered {
//!     eprintln!("buffered: {:?}", sender.last_error());
//! }
//! sender.close().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event_time;
pub mod packet;
pub mod registry;
pub mod sender;

pub use error::{EventTimeError, PacketError, SenderBuildError, SenderError};
pub use event_time::{EVENT_TIME_EXT_CODE, EventTime};
pub use packet::{BuiltPacket, PackerOptions, PacketBuilder};
pub use sender::{
    Connection, ConnectionFactory, ConnectionState, FluentSender, ForwardAddress,
    OverflowHandler, SenderBuilder, SenderConfig, SenderSettings, TcpConnection, TcpConnector,
    UnsentWarner, WriteError,
};
