//! Wire format encoding and decoding.
//!
//! Every frame starts with a single 32-bit header word:
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ Version │ Body length                  │
//! │ 4 bits  │ 28 bits                      │
//! │ 31..28  │ 27..0                        │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! The word is written in the host's native byte order. The daemon always runs
//! on the same machine as the client, so both ends agree on it. This does not
//! carry over to peers on hosts with a different endianness.

use crate::error::{RpcError, Result};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Protocol version carried in the top nibble of every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest body length the 28-bit length field can describe.
pub const MAX_BODY_LENGTH: usize = (1 << 28) - 1;

const VERSION_SHIFT: u32 = 28;
const LENGTH_MASK: u32 = 0x0FFF_FFFF;

/// Build a header word for a body of `length` bytes.
///
/// # Example
///
/// ```
/// use lumen_rpc::protocol::{build_header, parse_header};
///
/// let header = build_header(100).unwrap();
/// assert_eq!(header >> 28, 1);
/// assert_eq!(parse_header(header).unwrap(), 100);
/// ```
pub fn build_header(length: usize) -> Result<u32> {
    if length > MAX_BODY_LENGTH {
        return Err(RpcError::FrameTooLarge(length));
    }
    Ok(((PROTOCOL_VERSION as u32) << VERSION_SHIFT) | length as u32)
}

/// Extract the body length from a header word.
///
/// Fails with [`RpcError::ProtocolVersion`] if the version nibble is not
/// [`PROTOCOL_VERSION`].
pub fn parse_header(header: u32) -> Result<usize> {
    let version = (header >> VERSION_SHIFT) as u8;
    if version != PROTOCOL_VERSION {
        return Err(RpcError::ProtocolVersion {
            expected: PROTOCOL_VERSION,
            found: version,
        });
    }
    Ok((header & LENGTH_MASK) as usize)
}

/// Encode a header word to bytes (native endian).
#[inline]
pub fn encode_header(header: u32) -> [u8; HEADER_SIZE] {
    header.to_ne_bytes()
}

/// Decode a header word from bytes (native endian).
#[inline]
pub fn decode_header(buf: [u8; HEADER_SIZE]) -> u32 {
    u32::from_ne_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        for length in [0, 1, 11, 4096, 65_535, 1 << 20, MAX_BODY_LENGTH] {
            let header = build_header(length).unwrap();
            assert_eq!(parse_header(header).unwrap(), length);
        }
    }

    #[test]
    fn test_version_in_top_nibble() {
        let header = build_header(0).unwrap();
        assert_eq!(header, 0x1000_0000);

        let header = build_header(MAX_BODY_LENGTH).unwrap();
        assert_eq!(header, 0x1FFF_FFFF);
    }

    #[test]
    fn test_length_too_large_rejected() {
        let result = build_header(MAX_BODY_LENGTH + 1);
        assert!(matches!(result, Err(RpcError::FrameTooLarge(n)) if n == 1 << 28));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let header = build_header(42).unwrap();

        for version in [0u32, 2, 0xF] {
            let altered = (header & LENGTH_MASK) | (version << VERSION_SHIFT);
            let err = parse_header(altered).unwrap_err();
            assert!(matches!(
                err,
                RpcError::ProtocolVersion { expected: 1, found } if found as u32 == version
            ));
        }
    }

    #[test]
    fn test_header_native_byte_order() {
        let header = build_header(0x0203_0405).unwrap();
        let bytes = encode_header(header);

        assert_eq!(bytes, 0x1203_0405u32.to_ne_bytes());
        assert_eq!(decode_header(bytes), header);

        #[cfg(target_endian = "little")]
        assert_eq!(bytes, [0x05, 0x04, 0x03, 0x12]);

        #[cfg(target_endian = "big")]
        assert_eq!(bytes, [0x12, 0x03, 0x04, 0x05]);
    }

    #[test]
    fn test_header_size_is_exactly_4() {
        assert_eq!(HEADER_SIZE, 4);
        assert_eq!(encode_header(build_header(7).unwrap()).len(), 4);
    }
}
