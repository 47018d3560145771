//! Crypto error types.

use thiserror::Error;

/// Errors from cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Symmetric key has the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// Initialization vector has the wrong length.
    #[error("invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength {
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// Ciphertext is empty or not a whole number of blocks.
    #[error("invalid ciphertext length: {len}")]
    InvalidCiphertext {
        /// Ciphertext length.
        len: usize,
    },

    /// Embedded plaintext length points past the decrypted buffer.
    #[error("embedded length {size} exceeds decrypted buffer of {available} bytes")]
    LengthOutOfBounds {
        /// Length read from the buffer.
        size: usize,
        /// Bytes available after the length field.
        available: usize,
    },

    /// Plaintext does not fit the 32-bit length field.
    #[error("plaintext too large: {len} bytes")]
    PlaintextTooLarge {
        /// Plaintext length.
        len: usize,
    },

    /// Public parameters could not be parsed.
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Why parsing failed.
        reason: String,
    },

    /// Wrap mask is shorter than required.
    #[error("mask too short: need {needed} bytes, got {actual}")]
    MaskTooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes provided.
        actual: usize,
    },
}
