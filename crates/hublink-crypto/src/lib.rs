//! Hublink Cryptographic Primitives
//!
//! This crate provides the cryptographic building blocks for the Hublink
//! protocol: the hub's key wrap, session encryption and message integrity
//! tags.
//!
//! # Design
//!
//! All functions in this crate are pure - they have no side effects and
//! produce deterministic outputs given the same inputs. Random bytes required
//! for wrapping (mask) and encryption (IV) must be provided by the caller,
//! enabling:
//!
//! - Deterministic testing with fixed inputs
//! - No coupling to a particular RNG or runtime
//!
//! # Compatibility
//!
//! The key wrap is the hub's own byte-wise transform, not RSA with padding.
//! It is reproduced exactly because the hub parses its output byte by byte.
//! Session encryption prefixes the plaintext with its length and zero-pads to
//! the block size instead of using PKCS#7.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod integrity;
pub mod symmetric;
pub mod wrap;

pub use error::CryptoError;
pub use integrity::{TAG_SIZE, tag, verify};
pub use symmetric::{IV_SIZE, KEY_SIZE, decrypt, encrypt, padded_size};
pub use wrap::{MAX_MASK_SIZE, WrapKey, encode_masked, wrap};
