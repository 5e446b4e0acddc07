//! Seeded entropy for reproducible handshakes.

use std::sync::{Arc, Mutex, PoisonError};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tether_core::Entropy;

/// Deterministic [`Entropy`] backed by a seeded ChaCha20 generator.
///
/// Clones share one generator, so the byte sequence is the same no matter
/// which clone draws from it. Two values built from the same seed produce the
/// same sequence; use distinct seeds for the two sides of a link.
#[derive(Clone)]
pub struct SimEntropy {
    /// Wrapped in `Arc<Mutex<_>>` so clones advance one shared sequence
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEntropy {
    /// Generator seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }

    /// Shared handle, as `SecureConfig` expects.
    pub fn shared(seed: u64) -> Arc<dyn Entropy> {
        Arc::new(Self::with_seed(seed))
    }
}

impl Default for SimEntropy {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Entropy for SimEntropy {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

impl std::fmt::Debug for SimEntropy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEntropy").finish_non_exhaustive()
    }
}
