//! Connection establishment.
//!
//! A [`Connector`] opens a fresh [`Connection`] to the daemon each time it is
//! asked. The production implementation is [`TcpConnector`], which dials the
//! daemon's loopback RPC port. Tests plug in in-memory transports through the
//! same trait.
//!
//! # Example
//!
//! ```ignore
//! use lumen_rpc::transport::{Connector, TcpConnector};
//!
//! let connector = TcpConnector::default();
//! let connection = connector.connect().await?;
//! ```

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{RpcError, Result};

/// Default RPC port of the lighting daemon.
pub const DEFAULT_PORT: u16 = 9010;

/// Default address of the lighting daemon.
pub const DEFAULT_ADDRESS: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(Ipv4Addr::LOCALHOST),
    DEFAULT_PORT,
);

/// Default timeout for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Boxed future returned by [`Connector::connect`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read half of a connection.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live connection to the daemon, split into its two directions.
pub struct Connection {
    pub reader: BoxReader,
    pub writer: BoxWriter,
}

impl Connection {
    /// Create a connection from already split halves.
    pub fn new(reader: BoxReader, writer: BoxWriter) -> Self {
        Self { reader, writer }
    }

    /// Create a connection from a bidirectional stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to the daemon.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    fn connect(&self) -> BoxFuture<'_, Result<Connection>>;
}

impl<T: Connector + ?Sized> Connector for std::sync::Arc<T> {
    fn connect(&self) -> BoxFuture<'_, Result<Connection>> {
        (**self).connect()
    }
}

/// TCP connector for the daemon's loopback RPC port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: SocketAddr,
    timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for the given address.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the target address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    async fn dial(&self) -> Result<Connection> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| {
                RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.address),
                ))
            })??;

        // Requests are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let (reader, writer) = stream.into_split();
        Ok(Connection::new(Box::new(reader), Box::new(writer)))
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Connection>> {
        Box::pin(self.dial())
    }
}
