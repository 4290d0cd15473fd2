//! Error types shared by the sender, its codecs and its builders.
//!
//! None of these escape the emit API: failures while sending are recorded on
//! the sender and exposed through
//! [`FluentSender::last_error`](crate::FluentSender::last_error).

use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Failures observed by the emit pipeline.
///
/// I/O errors are held behind an [`Arc`] so the last error can be cloned out
/// of the sender while it keeps its own copy.
#[derive(Clone, Debug, Error)]
pub enum SenderError {
    /// Establishing the connection exceeded the configured timeout.
    #[error("timed out after {0:?} connecting to fluentd")]
    ConnectTimeout(Duration),
    /// Establishing the connection failed.
    #[error("failed to connect to fluentd: {0}")]
    Connect(Arc<io::Error>),
    /// Writing or flushing exceeded the configured timeout.
    #[error("timed out after {0:?} writing to fluentd")]
    WriteTimeout(Duration),
    /// The socket reported an error while writing.
    #[error("transport error writing to fluentd: {0}")]
    Transport(Arc<io::Error>),
    /// Anything else raised while sending; counted towards the error limit.
    #[error("unhandled error sending data: {0}")]
    Internal(String),
    /// The caller's record could not be serialised.
    #[error("record could not be serialised: {0}")]
    Serialization(String),
}

impl SenderError {
    /// Whether the failure came from the connection rather than the sender.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_) | Self::Connect(_) | Self::WriteTimeout(_) | Self::Transport(_)
        )
    }
}

/// Errors raised while decoding an [`EventTime`](crate::EventTime).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventTimeError {
    /// The ext payload was not exactly eight bytes long.
    #[error("malformed EventTime payload: expected 8 bytes, got {len}")]
    MalformedTimestamp { len: usize },
    /// The ext value carried a type code other than 0.
    #[error("unexpected MessagePack ext code {0} for EventTime")]
    UnexpectedExtCode(i8),
}

/// Errors raised while building a Forward Protocol packet.
#[derive(Debug, Error)]
pub enum PacketError {
    /// MessagePack serialisation failed.
    #[error("failed to serialise packet: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Errors that may occur while building a sender.
#[derive(Debug, Error)]
pub enum SenderBuildError {
    /// Invalid user supplied configuration.
    #[error("invalid sender configuration: {0}")]
    InvalidConfig(String),
    /// Declarative settings could not be parsed.
    #[error("invalid sender settings: {0}")]
    Settings(#[from] serde_json::Error),
}
