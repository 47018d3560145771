//! Session establishment payload types.
//!
//! These payloads handle the handshake: the hub's public parameters, the
//! registration request, the ticket the hub issues, and the activation frame
//! that binds a TCP connection to that ticket.
//!
//! # Security
//!
//! - **Debug Redaction**: every type that carries a token or key has a
//!   hand-written `Debug` impl that prints only the secret's length.

use serde::{Deserialize, Serialize};

use super::{message::CipherEnvelope, redacted};

/// Hub's asymmetric public parameters.
///
/// Both values are arbitrary-precision integers in decimal notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Public exponent.
    pub e: String,
    /// Modulus.
    pub n: String,
}

/// Identity presented at registration and on rename.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Stable client ID (or connection ID on rename).
    pub id: String,
    /// Secret token (or session token on rename).
    pub token: String,
    /// Mutable display name.
    pub alias_name: String,
    /// Client protocol version.
    #[serde(default)]
    pub version: String,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("id", &self.id)
            .field("token", &redacted(self.token.len()))
            .field("alias_name", &self.alias_name)
            .field("version", &self.version)
            .finish()
    }
}

/// Registration request body.
///
/// `key` is the wrapped symmetric key; `cipher` is the [`ClientIdentity`]
/// encrypted under that key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKey {
    /// Symmetric key wrapped with the hub's public parameters.
    pub key: Vec<u8>,
    /// Encrypted identity.
    pub cipher: CipherEnvelope,
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("key", &redacted(self.key.len()))
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// Connection credentials presented on the TCP channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTicket {
    /// Connection ID assigned by the hub.
    pub conn_id: String,
    /// Per-session token.
    pub token: String,
}

impl std::fmt::Debug for ClientTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTicket")
            .field("conn_id", &self.conn_id)
            .field("token", &redacted(self.token.len()))
            .finish()
    }
}

/// Ticket issued by the hub after a successful registration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Credentials to present on the TCP channel.
    pub client_ticket: ClientTicket,
    /// Hub transport address (`host:port`).
    pub address: String,
    /// Secret used to key inbound integrity tags.
    pub secret_key: String,
}

impl Ticket {
    /// Connection ID assigned by the hub.
    pub fn conn_id(&self) -> &str {
        &self.client_ticket.conn_id
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("client_ticket", &self.client_ticket)
            .field("address", &self.address)
            .field("secret_key", &redacted(self.secret_key.len()))
            .finish()
    }
}

/// Activation frame, the first frame written on every connection.
///
/// `id` is the wrapped connection ID; `cipher` is the serialized
/// [`ClientTicket`] encrypted under the session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherTicket {
    /// Connection ID wrapped with the hub's public parameters.
    pub id: Vec<u8>,
    /// Encrypted client ticket.
    pub cipher: CipherEnvelope,
}
