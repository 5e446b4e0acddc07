//! Ready-made secure-channel configurations.
//!
//! The host opens handshakes and pins the enclave's identity; the enclave
//! answers them and signs with that identity. Entropy is seeded so every run
//! of a test performs the same handshake.

use std::sync::Arc;

use tether_core::SecureConfig;
use tether_crypto::{Ed25519Signer, Ed25519Verifier};

use crate::sim_env::SimEntropy;

/// Long-term identity secret the fixtures give the enclave.
pub const ENCLAVE_IDENTITY: [u8; 32] = [0x5e; 32];

/// Host (verifying) and enclave (signing) configurations.
///
/// The two sides draw from distinct generators derived from `seed`.
pub fn secure_configs(seed: u64) -> (SecureConfig, SecureConfig) {
    let identity = Ed25519Signer::from_bytes(&ENCLAVE_IDENTITY);
    let verifier = Ed25519Verifier::new(identity.verifying_key());

    let host = SecureConfig::new(SimEntropy::shared(seed.wrapping_mul(2)))
        .with_verifier(Arc::new(verifier));
    let enclave = SecureConfig::new(SimEntropy::shared(seed.wrapping_mul(2).wrapping_add(1)))
        .with_signer(Arc::new(identity));
    (host, enclave)
}

/// Host configuration that trusts `identity` instead of the fixture one.
pub fn host_trusting(seed: u64, identity: &Ed25519Signer) -> SecureConfig {
    SecureConfig::new(SimEntropy::shared(seed))
        .with_verifier(Arc::new(Ed25519Verifier::new(identity.verifying_key())))
}
