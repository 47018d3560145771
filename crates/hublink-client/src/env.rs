//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (time and randomness). Production code uses [`crate::SystemEnv`]; tests
//! can substitute seeded or scripted implementations without touching the
//! session state machine.
//!
//! # Invariants
//!
//! - Isolation: Implementations must not share global state
//! - Unpredictability in production: `random_bytes()` feeds session keys,
//!   IVs and wrap masks, so it must be cryptographically secure

use std::time::Duration;

use crate::error::EntropyError;

/// Abstract environment providing time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Sleeps for the specified duration.
    ///
    /// Used by the heartbeat task between ticks.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use OS entropy (`getrandom`), never a
    /// seeded or thread-local PRNG, and MUST fail rather than hand back a
    /// predictable buffer.
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;

    /// Returns `N` random bytes.
    ///
    /// Convenience for fixed-size material such as keys and IVs.
    fn random_array<const N: usize>(&self) -> Result<[u8; N], EntropyError> {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes)?;
        Ok(bytes)
    }
}
