//! Client error types.

use hublink_crypto::CryptoError;
use hublink_proto::ProtocolError;
use thiserror::Error;

/// The operating system could not supply random bytes.
#[derive(Debug, Clone, Error)]
#[error("entropy source unavailable: {reason}")]
pub struct EntropyError {
    /// Description of the failure.
    pub reason: String,
}

/// Errors from the handshake with the hub's control plane.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// HTTP request failed or timed out.
    #[error("control-plane request failed: {reason}")]
    Request {
        /// Description of the failure.
        reason: String,
    },

    /// Hub answered with a non-success return code.
    #[error("hub rejected request: {message}")]
    Rejected {
        /// Return code from the hub.
        code: i32,
        /// Message supplied by the hub.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("malformed hub response: {reason}")]
    Decode {
        /// Description of the decode failure.
        reason: String,
    },

    /// Key wrap, encryption or decryption failed.
    #[error("handshake crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No randomness for the session key, IVs or wrap masks.
    #[error(transparent)]
    Entropy(#[from] EntropyError),
}

impl From<ProtocolError> for HandshakeError {
    fn from(err: ProtocolError) -> Self {
        Self::Decode { reason: err.to_string() }
    }
}

/// Errors from the framed TCP channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect to the hub's transport address.
    #[error("connect to {address} failed: {reason}")]
    Connect {
        /// Address dialed.
        address: String,
        /// Description of the failure.
        reason: String,
    },

    /// Socket I/O failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport was closed locally or by the peer.
    #[error("transport closed")]
    Closed,

    /// Frame could not be built or parsed.
    #[error("frame error: {0}")]
    Frame(#[from] ProtocolError),

    /// Frame payload could not be decrypted.
    #[error("frame decrypt failed: {0}")]
    Decrypt(#[from] CryptoError),
}

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Local configuration is missing or malformed.
    #[error("configuration error: {reason}")]
    Config {
        /// Description of the configuration problem.
        reason: String,
    },

    /// Handshake with the hub failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Framed channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Inbound message failed its integrity check.
    #[error("invalid message from {sender}: integrity tag mismatch")]
    Integrity {
        /// Claimed sender of the dropped message.
        sender: String,
    },

    /// Outbound letter could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] ProtocolError),

    /// Outbound letter could not be encrypted.
    #[error("encrypt failed: {0}")]
    Crypto(#[from] CryptoError),

    /// No randomness for an outbound IV.
    #[error(transparent)]
    Entropy(#[from] EntropyError),

    /// Operation requires an open session.
    #[error("session is not open")]
    NotOpen,

    /// `listen` was already called on this session.
    #[error("session is already being listened to")]
    AlreadyListening,
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors need caller action (fix configuration, open the session).
    /// Transient errors are healed by the heartbeat task's reconnection.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config { .. }
            | Self::NotOpen
            | Self::AlreadyListening
            | Self::Encode(_)
            | Self::Crypto(_)
            | Self::Entropy(_) => true,

            Self::Handshake(_) | Self::Transport(_) | Self::Integrity { .. } => false,
        }
    }
}
