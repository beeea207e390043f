//! Error types for lumen-rpc.

use thiserror::Error;

/// Main error type for all lumen-rpc operations.
///
/// None of these ever reach a `send_request` caller. They flow between the
/// transport, the frame codec and the two loops, which decide whether a fault
/// means "reconnect", "drop this request" or "stop the session".
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame header carried a protocol version we do not speak.
    #[error("Protocol version mismatch: expected {expected}, got {found}")]
    ProtocolVersion { expected: u8, found: u8 },

    /// Frame body does not fit in the 28-bit length field.
    #[error("Frame body of {0} bytes exceeds the header length field")]
    FrameTooLarge(usize),

    /// Envelope bytes could not be decoded.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// JSON serialization/deserialization error (JSON payload codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// The daemon closed the connection at a frame boundary.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No connection is currently held by the connection slot.
    #[error("Not connected")]
    NotConnected,

    /// A reconnect attempt failed. Fatal to the running session.
    #[error("Connection to daemon unavailable: {0}")]
    ConnectionUnavailable(String),

    /// `start()` was called outside a tokio runtime.
    #[error("No tokio runtime available to spawn the client loops")]
    NoRuntime,
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
