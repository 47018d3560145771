//! Payload types carried by the control plane and the framed channel.

pub mod message;
pub mod session;

/// Redact a secret for `Debug` output, keeping only its length.
pub fn redacted(len: usize) -> String {
    format!("<redacted {len} bytes>")
}
