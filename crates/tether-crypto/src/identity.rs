//! Handshake authentication hooks.
//!
//! The side that answers a handshake signs its ephemeral public key with a
//! long-term identity key; the side that opened the handshake verifies it.
//! Which key is trusted, and how the signed blob is encoded, belongs to the
//! embedding application, so both halves are traits. The Ed25519 pair here
//! covers the common case of a pinned identity key.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::error::{CryptoError, Result};

/// Domain separation for handshake signatures.
const SIGNATURE_CONTEXT: &[u8] = b"tether/handshake/ephemeral-key/v1";

/// Signs this side's ephemeral public key.
pub trait HandshakeSigner: Send + Sync {
    /// Produce the signed encoding of `ephemeral_public_key`.
    fn sign(&self, ephemeral_public_key: &[u8]) -> Result<Vec<u8>>;
}

/// Verifies the peer's signed ephemeral public key.
pub trait HandshakeVerifier: Send + Sync {
    /// Check `signed` and return the raw ephemeral public key it carries.
    fn verify<'a>(&self, signed: &'a [u8]) -> Result<&'a [u8]>;
}

/// Ed25519 signer. Encodes `[signature: 64][ephemeral public key]`.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Wrap a signing key.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Build from 32 secret bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(secret))
    }

    /// Public identity peers should pin.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl HandshakeSigner for Ed25519Signer {
    fn sign(&self, ephemeral_public_key: &[u8]) -> Result<Vec<u8>> {
        let signature = self.key.sign(&signed_message(ephemeral_public_key));

        let mut out = Vec::with_capacity(Signature::BYTE_SIZE + ephemeral_public_key.len());
        out.extend_from_slice(&signature.to_bytes());
        out.extend_from_slice(ephemeral_public_key);
        Ok(out)
    }
}

/// Ed25519 verifier pinned to one trusted identity.
pub struct Ed25519Verifier {
    trusted: VerifyingKey,
}

impl Ed25519Verifier {
    /// Trust only `trusted`.
    pub fn new(trusted: VerifyingKey) -> Self {
        Self { trusted }
    }
}

impl HandshakeVerifier for Ed25519Verifier {
    fn verify<'a>(&self, signed: &'a [u8]) -> Result<&'a [u8]> {
        let Some((signature, key)) = signed.split_first_chunk::<{ Signature::BYTE_SIZE }>()
        else {
            return Err(CryptoError::MalformedSignedKey {
                min: Signature::BYTE_SIZE,
                actual: signed.len(),
            });
        };
        if key.is_empty() {
            return Err(CryptoError::MalformedSignedKey {
                min: Signature::BYTE_SIZE,
                actual: signed.len(),
            });
        }

        let signature = Signature::from_bytes(signature);
        self.trusted
            .verify_strict(&signed_message(key), &signature)
            .map_err(|_| CryptoError::InvalidSignature)?;

        Ok(key)
    }
}

fn signed_message(ephemeral_public_key: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(SIGNATURE_CONTEXT.len() + ephemeral_public_key.len());
    message.extend_from_slice(SIGNATURE_CONTEXT);
    message.extend_from_slice(ephemeral_public_key);
    message
}
