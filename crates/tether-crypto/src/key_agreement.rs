//! Ephemeral key agreement.
//!
//! One [`KeyAgreement`] value lives for one handshake attempt. It holds a
//! freshly generated keypair and can derive exactly one shared secret:
//! [`KeyAgreement::compute_shared_secret`] consumes the value, so the private
//! half is dropped (and zeroized) as soon as it has been used.

use std::fmt;

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Raw output of a key agreement, used directly as the cipher key.
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl SharedSecret {
    /// Wrap secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the secret holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED; {}])", self.0.len())
    }
}

/// Per-handshake Diffie-Hellman state.
pub trait KeyAgreement: Send {
    /// Raw public half of the ephemeral keypair, as sent on the wire.
    fn public_key(&self) -> &[u8];

    /// Derive the shared secret with the peer's raw public key.
    fn compute_shared_secret(self: Box<Self>, peer_public_key: &[u8]) -> Result<SharedSecret>;
}

/// X25519 ephemeral key agreement.
pub struct X25519KeyAgreement {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyAgreement {
    /// Size of public keys, private keys and the shared secret
    pub const KEY_SIZE: usize = 32;

    /// Build a keypair from 32 bytes of secure randomness.
    ///
    /// Clamping is applied by `x25519-dalek` when the scalar is used.
    pub fn from_random(random: [u8; Self::KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(random);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Build a keypair from a random seed slice, as the suite table does.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let random: [u8; Self::KEY_SIZE] = seed.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: Self::KEY_SIZE, actual: seed.len() }
        })?;
        Ok(Self::from_random(random))
    }
}

impl KeyAgreement for X25519KeyAgreement {
    fn public_key(&self) -> &[u8] {
        self.public.as_bytes()
    }

    fn compute_shared_secret(self: Box<Self>, peer_public_key: &[u8]) -> Result<SharedSecret> {
        let peer: [u8; Self::KEY_SIZE] = peer_public_key.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: Self::KEY_SIZE, actual: peer_public_key.len() }
        })?;

        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        Ok(SharedSecret::new(shared.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: u8, b: u8) -> (Box<X25519KeyAgreement>, Box<X25519KeyAgreement>) {
        (
            Box::new(X25519KeyAgreement::from_random([a; 32])),
            Box::new(X25519KeyAgreement::from_random([b; 32])),
        )
    }

    #[test]
    fn both_sides_agree() {
        let (alice, bob) = pair(1, 2);
        let alice_public = alice.public_key().to_vec();
        let bob_public = bob.public_key().to_vec();

        let from_alice = alice.compute_shared_secret(&bob_public).unwrap();
        let from_bob = bob.compute_shared_secret(&alice_public).unwrap();

        assert_eq!(from_alice.as_bytes(), from_bob.as_bytes());
        assert_eq!(from_alice.len(), X25519KeyAgreement::KEY_SIZE);
    }

    #[test]
    fn fresh_keypairs_give_fresh_secrets() {
        let (alice, bob) = pair(1, 2);
        let (alice2, bob2) = pair(3, 4);
        let bob_public = bob.public_key().to_vec();
        let bob2_public = bob2.public_key().to_vec();

        let first = alice.compute_shared_secret(&bob_public).unwrap();
        let second = alice2.compute_shared_secret(&bob2_public).unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn rejects_low_order_points() {
        let (alice, _) = pair(1, 2);
        let err = alice.compute_shared_secret(&[0u8; 32]).unwrap_err();
        assert_eq!(err, CryptoError::NonContributory);
    }

    #[test]
    fn rejects_wrong_key_size() {
        let (alice, _) = pair(1, 2);
        let err = alice.compute_shared_secret(&[9u8; 31]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength { expected: 32, actual: 31 });
    }

    #[test]
    fn debug_redacts_secret() {
        let secret = SharedSecret::new(vec![0xaa; 32]);
        assert_eq!(format!("{secret:?}"), "SharedSecret([REDACTED; 32])");
    }
}
