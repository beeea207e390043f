//! Codec module - payload serialization for request and response messages.
//!
//! The envelope that wraps every frame has a fixed encoding (see
//! [`crate::protocol::Envelope`]). The message carried inside its `buffer`
//! field is opaque to the transport and goes through a pluggable [`Codec`]:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (default)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! The client is generic over its codec, so the choice is made at compile time
//! and the writer/reader loops never dispatch through a vtable for it.
//!
//! # Example
//!
//! ```
//! use lumen_rpc::codec::{Codec, JsonCodec, MsgPackCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = JsonCodec::encode(&[1, 2, 3]).unwrap();
//! assert_eq!(encoded, b"[1,2,3]");
//! ```

mod json;
mod msgpack;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// Encode/decode capability for request and response messages.
pub trait Codec: Send + Sync + 'static {
    /// Encode a message into the bytes carried by an envelope.
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>>;

    /// Decode envelope bytes into the expected message type.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
