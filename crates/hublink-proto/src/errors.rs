//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),

    /// Frame header could not be read from the given bytes.
    #[error("frame header needs {expected} bytes, got {actual}")]
    HeaderTooShort {
        /// Header size in bytes.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Payload exceeds the maximum frame size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}
