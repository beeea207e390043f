//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`: structs go out as maps keyed by field
//! name, so the daemon side can evolve message fields without depending on
//! their declaration order.
//!
//! # Example
//!
//! ```
//! use lumen_rpc::codec::{Codec, MsgPackCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Patch {
//!     universe: u32,
//!     channel: u16,
//! }
//!
//! let patch = Patch { universe: 1, channel: 42 };
//! let encoded = MsgPackCodec::encode(&patch).unwrap();
//! let decoded: Patch = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, patch);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Codec;
use crate::error::Result;

/// MessagePack codec for structured messages.
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    #[inline]
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
