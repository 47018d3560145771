//! Hublink Client
//!
//! Self-healing encrypted session with a Hublink message hub.
//!
//! # Architecture
//!
//! The client opens a session in two phases:
//! - A handshake over the hub's control plane negotiates a fresh session key
//!   and returns a ticket naming the hub's TCP address
//! - A framed TCP channel is activated with that ticket and then carries
//!   enveloped letters out and integrity-tagged replies in
//!
//! Once open, a heartbeat task pings the hub and transparently repeats both
//! phases whenever the channel fails. Applications see a pause in delivery,
//! never a broken session.
//!
//! # Components
//!
//! - [`HubClient`]: Session handle (open, listen, send, rename, close)
//! - [`HandshakeClient`]: Public-key fetch and registration
//! - [`FramedTransport`]: Length-prefixed channel with a background decode
//!   loop
//! - [`ControlPlane`]: Seam for the hub's request/response endpoints
//! - [`Environment`]: Time and randomness (deterministic testing)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod control;
mod env;
mod error;
mod handshake;
mod keys;
mod session;
mod system_env;
mod transport;

pub use config::{ClientOptions, DEFAULT_CONFIG_FILE, HubConfig, PROTOCOL_VERSION};
pub use control::{ControlPlane, HttpControlPlane, HubResponse};
pub use env::Environment;
pub use error::{ClientError, EntropyError, HandshakeError, TransportError};
pub use handshake::{Handshake, HandshakeClient};
pub use keys::SessionKeys;
pub use session::{ConnectionStatus, HubClient, HubMessage, Link, Subscription};
pub use system_env::SystemEnv;
pub use transport::FramedTransport;
