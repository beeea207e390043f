//! Whole-frame encoding and reading.
//!
//! A frame is `[4-byte header][envelope bytes]`. Writing builds the full frame
//! up front so a failed write can be retried with the exact same bytes.
//! Reading pulls exactly one frame from an async stream.
//!
//! # Example
//!
//! ```
//! use lumen_rpc::protocol::{encode_frame, read_frame, Envelope};
//!
//! # tokio_test_block_on(async {
//! let envelope = Envelope::request(1, "GetPlugins", Vec::<u8>::new());
//! let bytes = encode_frame(&envelope).unwrap();
//!
//! let mut reader = &bytes[..];
//! let decoded = read_frame(&mut reader).await.unwrap();
//! assert_eq!(decoded, envelope);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::envelope::Envelope;
use super::wire_format::{build_header, decode_header, encode_header, parse_header, HEADER_SIZE};
use crate::error::{RpcError, Result};

/// Upper bound on the body buffer reserved before any body byte is read.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Encode an envelope into a complete frame (header + body).
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes> {
    let body = envelope.encode();
    let header = build_header(body.len())?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len());
    frame.put_slice(&encode_header(header));
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Read exactly one frame and decode its envelope.
///
/// An EOF before the first header byte is reported as
/// [`RpcError::ConnectionClosed`]. An EOF anywhere later is a truncated frame
/// and surfaces as an I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Err(RpcError::ConnectionClosed);
    }
    if first < HEADER_SIZE {
        reader.read_exact(&mut header[first..]).await?;
    }

    let length = parse_header(decode_header(header))?;

    // Grow with the bytes that actually arrive, not the advertised length.
    let mut body = Vec::with_capacity(length.min(INITIAL_BODY_CAPACITY));
    let read = (&mut *reader).take(length as u64).read_to_end(&mut body).await?;
    if read < length {
        return Err(RpcError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("frame body truncated: {} of {} bytes", read, length),
        )));
    }

    Envelope::decode(&body)
}
