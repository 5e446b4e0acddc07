//! Protocol suite table.
//!
//! A handshake names its suite with a [`ProtocolId`]; the secure-channel state
//! machine looks that id up here to obtain the key agreement and cipher
//! factories. Adding a suite means registering a new entry, never touching
//! the state machine.

use std::collections::HashMap;

use tether_proto::ProtocolId;

use crate::{
    aead::{Decryptor, Encryptor, MessageDecryptor, MessageEncryptor},
    error::Result,
    key_agreement::{KeyAgreement, SharedSecret, X25519KeyAgreement},
};

/// Builds a key agreement from `key_agreement_seed_len` random bytes.
pub type KeyAgreementFactory = fn(&[u8]) -> Result<Box<dyn KeyAgreement>>;

/// Builds an encryptor from a shared secret and a random nonce seed.
pub type EncryptorFactory = fn(&SharedSecret, u32) -> Result<Box<dyn MessageEncryptor>>;

/// Builds a decryptor from a shared secret.
pub type DecryptorFactory = fn(&SharedSecret) -> Result<Box<dyn MessageDecryptor>>;

/// Key agreement and cipher pairing selected by one protocol id.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolSuite {
    /// Human-readable name, for logs
    pub name: &'static str,
    /// Random bytes the key agreement factory consumes
    pub key_agreement_seed_len: usize,
    /// Key agreement factory
    pub key_agreement: KeyAgreementFactory,
    /// Encryptor factory
    pub encryptor: EncryptorFactory,
    /// Decryptor factory
    pub decryptor: DecryptorFactory,
}

impl ProtocolSuite {
    /// X25519 key agreement keying AES-GCM directly with the 32-byte secret.
    pub const X25519_AES_GCM: Self = Self {
        name: "x25519-aes-gcm",
        key_agreement_seed_len: X25519KeyAgreement::KEY_SIZE,
        key_agreement: x25519_key_agreement,
        encryptor: aes_gcm_encryptor,
        decryptor: aes_gcm_decryptor,
    };
}

fn x25519_key_agreement(seed: &[u8]) -> Result<Box<dyn KeyAgreement>> {
    Ok(Box::new(X25519KeyAgreement::from_seed(seed)?))
}

fn aes_gcm_encryptor(secret: &SharedSecret, nonce_seed: u32) -> Result<Box<dyn MessageEncryptor>> {
    Ok(Box::new(Encryptor::new(secret.as_bytes(), nonce_seed)?))
}

fn aes_gcm_decryptor(secret: &SharedSecret) -> Result<Box<dyn MessageDecryptor>> {
    Ok(Box::new(Decryptor::new(secret.as_bytes())?))
}

/// Lookup table from protocol id to suite.
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    suites: HashMap<ProtocolId, ProtocolSuite>,
}

impl ProtocolRegistry {
    /// Registry with no suites.
    pub fn empty() -> Self {
        Self { suites: HashMap::new() }
    }

    /// Register `suite` under `id`, returning any suite it replaced.
    pub fn register(&mut self, id: ProtocolId, suite: ProtocolSuite) -> Option<ProtocolSuite> {
        self.suites.insert(id, suite)
    }

    /// Suite for `id`, if any.
    pub fn get(&self, id: ProtocolId) -> Option<&ProtocolSuite> {
        self.suites.get(&id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ProtocolId> {
        let mut ids: Vec<_> = self.suites.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ProtocolRegistry {
    /// Registry with the built-in suites.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ProtocolId::X25519_AES_GCM, ProtocolSuite::X25519_AES_GCM);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_x25519_aes_gcm() {
        let registry = ProtocolRegistry::default();
        assert_eq!(registry.ids(), vec![ProtocolId::X25519_AES_GCM]);
        assert!(registry.get(ProtocolId::new(1)).is_none());
    }

    #[test]
    fn suite_factories_compose() {
        let suite = *ProtocolRegistry::default().get(ProtocolId::X25519_AES_GCM).unwrap();

        let alice = (suite.key_agreement)(&[1u8; 32]).unwrap();
        let bob = (suite.key_agreement)(&[2u8; 32]).unwrap();
        let alice_public = alice.public_key().to_vec();
        let bob_public = bob.public_key().to_vec();

        let alice_secret = alice.compute_shared_secret(&bob_public).unwrap();
        let bob_secret = bob.compute_shared_secret(&alice_public).unwrap();

        let mut encryptor = (suite.encryptor)(&alice_secret, 0).unwrap();
        let decryptor = (suite.decryptor)(&bob_secret).unwrap();

        let sealed = encryptor.seal(b"through the table").unwrap();
        assert_eq!(sealed.len(), encryptor.sealed_len(17));
        assert_eq!(decryptor.open(&sealed).unwrap(), b"through the table");
    }

    #[test]
    fn seed_length_is_checked() {
        let suite = ProtocolSuite::X25519_AES_GCM;
        assert!((suite.key_agreement)(&[0u8; 16]).is_err());
    }
}
