//! # lumen-rpc
//!
//! Async RPC client for a local lighting-device daemon.
//!
//! The daemon listens on a loopback TCP port (9010 by default) and speaks a
//! request/response protocol: each message is a protobuf envelope carrying a
//! method name, a request id and an opaque payload, preceded by a 4-byte
//! version/length header.
//!
//! ## Architecture
//!
//! - **Writer loop**: drains the request queue, assigns ids, registers the
//!   pending call and writes the frame
//! - **Reader loop**: reads frames and routes responses to their callbacks
//! - **Connection slot**: one shared connection, reconnected at most once per
//!   failure no matter which loop saw it
//!
//! ## Example
//!
//! ```no_run
//! use lumen_rpc::RpcClient;
//!
//! #[tokio::main]
//! async fn main() -> lumen_rpc::Result<()> {
//!     let client = RpcClient::builder().build();
//!     client.start()?;
//!
//!     client.send_request("GetPlugins", (), |plugins: Vec<String>| async move {
//!         println!("{:?}", plugins);
//!     });
//!
//!     let count: u32 = client.call("GetUniverseCount", ()).await?;
//!     println!("{} universes", count);
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod codec;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;
mod reader;
mod shutdown;
mod writer;

pub use client::{ClientBuilder, ClientConfig, RpcClient};
pub use codec::{Codec, JsonCodec, MsgPackCodec};
pub use correlation::DEFAULT_PENDING_TTL;
pub use error::{Result, RpcError};
pub use reader::DEFAULT_MAX_CONCURRENT_CALLBACKS;
pub use transport::{DEFAULT_ADDRESS, DEFAULT_PORT};
pub use writer::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT};
