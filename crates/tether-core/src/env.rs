//! Entropy source for handshakes.
//!
//! Secure channels need randomness twice per handshake: the ephemeral key
//! agreement seed and the initial nonce counter. Neither is drawn from a
//! global generator. Both come from the [`Entropy`] passed in through
//! [`SecureConfig`](crate::secure::SecureConfig), so a seeded implementation
//! makes every handshake in a test reproducible.
//!
//! - [`SystemEntropy`]: operating system CSPRNG, for production
//! - `SimEntropy` (tether-harness): seeded ChaCha20, for tests

/// Source of cryptographically secure random bytes.
///
/// Implementations MUST be cryptographically secure outside of tests: the
/// bytes seed private keys and nonce counters.
pub trait Entropy: Send + Sync + 'static {
    /// Fill `buffer` with random bytes.
    ///
    /// Infallible. Implementations may panic only when no secure source
    /// exists at all, since there is no safe value to fall back to.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `len`-byte vector.
    fn random_vec(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// Random `u32`.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }
}

/// Operating system entropy via `getrandom`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEntropy;

impl Entropy for SystemEntropy {
    #[allow(clippy::panic)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(err) = getrandom::fill(buffer) {
            panic!("operating system entropy unavailable: {err}");
        }
    }
}
