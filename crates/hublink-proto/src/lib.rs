//! Hublink wire protocol.
//!
//! Types exchanged with the hub, the CBOR codec used to serialize them, and
//! the length-prefixed frame format of the persistent TCP channel.
//!
//! # Layers
//!
//! ```text
//! TCP stream
//!   └─ Frame            [u32 LE length][payload]
//!        └─ CipherEnvelope  { iv, data }   (iv empty = plaintext)
//!             └─ Letter (outbound) / Reply (inbound)
//! ```
//!
//! The very first frame of a connection is a [`CipherTicket`] instead of an
//! envelope; it activates the connection on the hub side.
//!
//! Handshake payloads ([`PublicKey`], [`SharedKey`], [`Ticket`]) travel over
//! the control plane, base64-encoded, and never appear on the TCP channel.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod payloads;

pub use codec::{from_cbor, to_cbor};
pub use errors::ProtocolError;
pub use frame::{FrameHeader, MAX_PAYLOAD_SIZE, encode_frame};
pub use payloads::{
    redacted,
    message::{CipherEnvelope, Letter, LetterKind, Reply},
    session::{CipherTicket, ClientIdentity, ClientTicket, PublicKey, SharedKey, Ticket},
};
