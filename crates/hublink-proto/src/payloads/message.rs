//! Message payload types for the framed channel.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Wire container for a frame payload.
///
/// An empty `iv` marks a plaintext payload; otherwise `data` is ciphertext
/// under the session key with `iv` as its initialization vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    /// Initialization vector (empty when unencrypted).
    #[serde(default)]
    pub iv: Vec<u8>,
    /// Ciphertext or plaintext bytes.
    pub data: Vec<u8>,
}

impl CipherEnvelope {
    /// Envelope around an unencrypted payload.
    pub fn plaintext(data: Vec<u8>) -> Self {
        Self { iv: Vec::new(), data }
    }

    /// Envelope around a ciphertext.
    pub fn encrypted(iv: Vec<u8>, data: Vec<u8>) -> Self {
        Self { iv, data }
    }

    /// Whether the payload must be decrypted before use.
    pub fn is_encrypted(&self) -> bool {
        !self.iv.is_empty()
    }
}

/// Letter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum LetterKind {
    /// Ordinary message to a single receiver.
    Single = 0,
    /// Change of the connection's alias.
    Rename = 1,
    /// Keepalive.
    Ping = 2,
}

/// Outbound application-level message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Letter {
    /// What the hub should do with this letter.
    pub kind: LetterKind,
    /// Receiver identifier (alias or connection ID); empty for system letters.
    #[serde(default)]
    pub receiver: String,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl Letter {
    /// Ordinary message.
    pub fn single(receiver: impl Into<String>, data: Vec<u8>) -> Self {
        Self { kind: LetterKind::Single, receiver: receiver.into(), data }
    }

    /// Rename request carrying a serialized identity.
    pub fn rename(data: Vec<u8>) -> Self {
        Self { kind: LetterKind::Rename, receiver: String::new(), data }
    }

    /// Keepalive.
    pub fn ping() -> Self {
        Self { kind: LetterKind::Ping, receiver: String::new(), data: b"Ping".to_vec() }
    }
}

/// Inbound message as delivered by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Sender identifier.
    pub sender: String,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Hub timestamp (seconds since the Unix epoch).
    pub timestamp: i64,
    /// HMAC-SHA256 of `data` under the session's secret key.
    pub hmac: Vec<u8>,
}
