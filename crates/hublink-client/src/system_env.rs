//! Environment backed by the tokio clock and the OS entropy source.

use std::time::Duration;

use crate::{env::Environment, error::EntropyError};

/// Environment for real sessions.
///
/// Session keys, IVs and wrap masks come straight from `getrandom`. When the
/// OS cannot supply entropy the draw fails, and with it the handshake or send
/// that needed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|e| {
            tracing::error!(error = %e, len = buffer.len(), "getrandom failed");
            EntropyError { reason: e.to_string() }
        })
    }
}
