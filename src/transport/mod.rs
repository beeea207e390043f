//! Transport module - how the client reaches the daemon.
//!
//! Provides:
//! - [`Connector`] - opens a fresh connection on demand
//! - [`TcpConnector`] - loopback TCP to the daemon's RPC port

mod tcp;

pub use tcp::{
    BoxFuture, BoxReader, BoxWriter, Connection, Connector, TcpConnector, DEFAULT_ADDRESS,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT,
};
