//! RPC envelope carried in every frame body.
//!
//! The envelope is the daemon's protobuf `RpcMessage`:
//!
//! ```text
//! message RpcMessage {
//!   required Type   type   = 1;
//!   optional int32  id     = 2;
//!   optional string name   = 3;
//!   optional bytes  buffer = 4;
//! }
//! ```
//!
//! Only these four fields exist, so the wire format is implemented directly
//! rather than pulling in a protobuf code generator. Unknown fields are skipped
//! on decode.

use bytes::Bytes;

use crate::error::{RpcError, Result};

const WIRE_TYPE_VARINT: u8 = 0;
const WIRE_TYPE_FIXED64: u8 = 1;
const WIRE_TYPE_LEN: u8 = 2;
const WIRE_TYPE_FIXED32: u8 = 5;

const FIELD_TYPE: u32 = 1;
const FIELD_ID: u32 = 2;
const FIELD_NAME: u32 = 3;
const FIELD_BUFFER: u32 = 4;

/// Envelope type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    Request,
    Response,
    ResponseCancel,
    ResponseFailed,
    ResponseNotImplemented,
    Disconnect,
    DescriptorRequest,
    DescriptorResponse,
    RequestCancel,
    StreamRequest,
    /// A value this client does not know; passed through untouched.
    Other(i32),
}

impl EnvelopeType {
    /// Numeric value on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            EnvelopeType::Request => 1,
            EnvelopeType::Response => 2,
            EnvelopeType::ResponseCancel => 3,
            EnvelopeType::ResponseFailed => 4,
            EnvelopeType::ResponseNotImplemented => 5,
            EnvelopeType::Disconnect => 6,
            EnvelopeType::DescriptorRequest => 7,
            EnvelopeType::DescriptorResponse => 8,
            EnvelopeType::RequestCancel => 9,
            EnvelopeType::StreamRequest => 10,
            EnvelopeType::Other(value) => value,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => EnvelopeType::Request,
            2 => EnvelopeType::Response,
            3 => EnvelopeType::ResponseCancel,
            4 => EnvelopeType::ResponseFailed,
            5 => EnvelopeType::ResponseNotImplemented,
            6 => EnvelopeType::Disconnect,
            7 => EnvelopeType::DescriptorRequest,
            8 => EnvelopeType::DescriptorResponse,
            9 => EnvelopeType::RequestCancel,
            10 => EnvelopeType::StreamRequest,
            other => EnvelopeType::Other(other),
        }
    }

    /// True for the daemon's "your request did not produce a response" types.
    #[inline]
    pub fn is_failed_response(self) -> bool {
        matches!(
            self,
            EnvelopeType::ResponseCancel
                | EnvelopeType::ResponseFailed
                | EnvelopeType::ResponseNotImplemented
        )
    }
}

/// Outer RPC message: type, correlation id, method name and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeType,
    pub id: i32,
    pub name: String,
    pub buffer: Bytes,
}

impl Envelope {
    /// Create a request envelope.
    pub fn request(id: i32, name: impl Into<String>, buffer: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeType::Request,
            id,
            name: name.into(),
            buffer: buffer.into(),
        }
    }

    /// Create a response envelope.
    pub fn response(id: i32, name: impl Into<String>, buffer: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeType::Response,
            id,
            name: name.into(),
            buffer: buffer.into(),
        }
    }

    /// Encode to protobuf bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.name.len() + self.buffer.len());
        encode_int32(FIELD_TYPE, self.kind.as_i32(), &mut buf);
        encode_int32(FIELD_ID, self.id, &mut buf);
        encode_bytes(FIELD_NAME, self.name.as_bytes(), &mut buf);
        encode_bytes(FIELD_BUFFER, &self.buffer, &mut buf);
        buf
    }

    /// Decode from protobuf bytes.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut kind = EnvelopeType::Other(0);
        let mut id = 0;
        let mut name = String::new();
        let mut buffer = Bytes::new();

        while !buf.is_empty() {
            let (field, wire_type) =
                decode_tag(&mut buf).ok_or_else(|| malformed("truncated field tag"))?;

            match (field, wire_type) {
                (FIELD_TYPE, WIRE_TYPE_VARINT) => {
                    let value = decode_varint(&mut buf).ok_or_else(|| malformed("type"))?;
                    kind = EnvelopeType::from_i32(value as i32);
                }
                (FIELD_ID, WIRE_TYPE_VARINT) => {
                    let value = decode_varint(&mut buf).ok_or_else(|| malformed("id"))?;
                    id = value as i32;
                }
                (FIELD_NAME, WIRE_TYPE_LEN) => {
                    let data =
                        decode_length_delimited(&mut buf).ok_or_else(|| malformed("name"))?;
                    name = String::from_utf8(data.to_vec())
                        .map_err(|_| malformed("name is not valid UTF-8"))?;
                }
                (FIELD_BUFFER, WIRE_TYPE_LEN) => {
                    let data =
                        decode_length_delimited(&mut buf).ok_or_else(|| malformed("buffer"))?;
                    buffer = Bytes::copy_from_slice(data);
                }
                (_, wire_type) => {
                    skip_field(wire_type, &mut buf)
                        .ok_or_else(|| malformed(&format!("field {}", field)))?;
                }
            }
        }

        Ok(Self {
            kind,
            id,
            name,
            buffer,
        })
    }
}

fn malformed(what: &str) -> RpcError {
    RpcError::MalformedEnvelope(what.to_string())
}

fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let (&byte, rest) = buf.split_first()?;
        *buf = rest;

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn encode_tag(field_number: u32, wire_type: u8, buf: &mut Vec<u8>) {
    encode_varint(((field_number as u64) << 3) | (wire_type as u64), buf);
}

fn decode_tag(buf: &mut &[u8]) -> Option<(u32, u8)> {
    let tag = decode_varint(buf)?;
    Some(((tag >> 3) as u32, (tag & 0x07) as u8))
}

// int32 and enums are sign-extended to 64 bits, so negatives take 10 bytes.
fn encode_int32(field_number: u32, value: i32, buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_VARINT, buf);
    encode_varint(value as i64 as u64, buf);
}

fn encode_bytes(field_number: u32, data: &[u8], buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_LEN, buf);
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

fn decode_length_delimited<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = usize::try_from(decode_varint(buf)?).ok()?;
    if buf.len() < len {
        return None;
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Some(data)
}

fn skip_field(wire_type: u8, buf: &mut &[u8]) -> Option<()> {
    let skip = match wire_type {
        WIRE_TYPE_VARINT => {
            decode_varint(buf)?;
            return Some(());
        }
        WIRE_TYPE_LEN => {
            decode_length_delimited(buf)?;
            return Some(());
        }
        WIRE_TYPE_FIXED64 => 8,
        WIRE_TYPE_FIXED32 => 4,
        _ => return None,
    };
    if buf.len() < skip {
        return None;
    }
    *buf = &buf[skip..];
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encoding_bytes() {
        let envelope = Envelope::request(1, "GetUniverseInfo", &b"\x01"[..]);
        let encoded = envelope.encode();

        let mut expected = vec![0x08, 0x01, 0x10, 0x01, 0x1a, 15];
        expected.extend_from_slice(b"GetUniverseInfo");
        expected.extend_from_slice(&[0x22, 0x01, 0x01]);
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_encode_decode() {
        let envelope = Envelope::response(7, "UpdateDmxData", Bytes::from_static(b"\x00\xff"));
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_negative_id_survives() {
        let envelope = Envelope::request(-5, "x", Bytes::new());
        let encoded = envelope.encode();
        // tag + 10-byte sign-extended varint
        assert_eq!(encoded[2], 0x10);
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded.id, -5);
    }

    #[test]
    fn test_unknown_type_passed_through() {
        let mut envelope = Envelope::request(3, "x", Bytes::new());
        envelope.kind = EnvelopeType::Other(42);
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded.kind, EnvelopeType::Other(42));
        assert_eq!(EnvelopeType::from_i32(42).as_i32(), 42);
    }

    #[test]
    fn test_known_type_values() {
        for value in 1..=10 {
            let kind = EnvelopeType::from_i32(value);
            assert!(!matches!(kind, EnvelopeType::Other(_)));
            assert_eq!(kind.as_i32(), value);
        }
        assert!(EnvelopeType::ResponseFailed.is_failed_response());
        assert!(!EnvelopeType::Response.is_failed_response());
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let mut bytes = Envelope::response(9, "m", Bytes::from_static(b"ok")).encode();
        // field 7 varint, field 8 fixed32, field 9 length-delimited
        bytes.extend_from_slice(&[0x38, 0x96, 0x01]);
        bytes.extend_from_slice(&[0x45, 1, 2, 3, 4]);
        bytes.extend_from_slice(&[0x4a, 0x02, b'h', b'i']);

        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.id, 9);
        assert_eq!(decoded.buffer, Bytes::from_static(b"ok"));
    }

    #[test]
    fn test_missing_fields_default() {
        let decoded = Envelope::decode(&[0x08, 0x02]).unwrap();
        assert_eq!(decoded.kind, EnvelopeType::Response);
        assert_eq!(decoded.id, 0);
        assert!(decoded.name.is_empty());
        assert!(decoded.buffer.is_empty());
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let bytes = Envelope::response(1, "m", Bytes::from_static(b"payload")).encode();
        let result = Envelope::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(RpcError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_invalid_wire_type_rejected() {
        // field 1, wire type 3 (deprecated group start)
        let result = Envelope::decode(&[0x0b]);
        assert!(result.is_err());
    }
}
