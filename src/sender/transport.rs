//! Transport primitives for the sender.
//!
//! The sender only needs three things from a transport: open a connection,
//! write a payload and wait for it to flush, and shut the connection down.
//! [`TcpConnector`] provides them over tokio's `TcpStream`; tests and
//! alternative transports plug in their own [`ConnectionFactory`].

use std::{fmt, future::Future, io};

use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream};

/// Default collector host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default Forward Protocol port.
pub const DEFAULT_PORT: u16 = 24224;

/// Collector address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardAddress {
    /// Hostname or IP address to connect to.
    pub host: String,
    /// TCP port number.
    pub port: u16,
}

impl ForwardAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for ForwardAddress {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for ForwardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Failure reported by [`Connection::write_all_and_flush`].
///
/// The distinction drives the retry policy: transport errors close the
/// connection at once, internal errors only count towards the sender's
/// error limit because the socket itself may still be healthy.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The socket failed.
    #[error(transparent)]
    Transport(#[from] io::Error),
    /// Anything else went wrong while handing the payload over.
    #[error("{0}")]
    Internal(String),
}

/// An open connection to the collector.
pub trait Connection: Send + 'static {
    /// Write the whole payload and wait until it has been flushed.
    fn write_all_and_flush(
        &mut self,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Shut the connection down.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Opens connections to the collector.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a new connection to `address`.
    ///
    /// The sender bounds the returned future with its connect timeout.
    fn connect(
        &self,
        address: &ForwardAddress,
    ) -> impl Future<Output = io::Result<Self::Connection>> + Send;
}

/// Plain TCP connection factory.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

/// TCP connection produced by [`TcpConnector`].
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl ConnectionFactory for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, address: &ForwardAddress) -> io::Result<TcpConnection> {
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        Ok(TcpConnection::from_stream(stream))
    }
}

impl Connection for TcpConnection {
    async fn write_all_and_flush(&mut self, payload: &[u8]) -> Result<(), WriteError> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
