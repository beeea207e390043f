//! Protocol module - wire header, envelope and framing.
//!
//! This module implements the binary protocol spoken with the daemon:
//! - 4-byte version/length header
//! - Protobuf `RpcMessage` envelope
//! - Whole-frame encode and read helpers

mod envelope;
mod frame;
mod wire_format;

pub use envelope::{Envelope, EnvelopeType};
pub use frame::{encode_frame, read_frame};
pub use wire_format::{
    build_header, decode_header, encode_header, parse_header, HEADER_SIZE, MAX_BODY_LENGTH,
    PROTOCOL_VERSION,
};
