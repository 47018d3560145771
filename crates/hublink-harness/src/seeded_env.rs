//! Seeded environment for reproducible test runs.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use hublink_client::{EntropyError, Environment};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Environment drawing randomness from a seeded ChaCha stream.
///
/// Clones share the stream, so a session and its handshake client consume
/// one reproducible sequence. Time is tokio's, which lets tests pause it.
#[derive(Debug, Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SeededEnv {
    /// Environment seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Environment for SeededEnv {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
        Ok(())
    }
}
