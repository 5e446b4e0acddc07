//! Per-message AEAD with a counter nonce.
//!
//! An [`Encryptor`] owns a fixed key and a 32-bit counter seeded from random
//! bytes the caller supplies. Each message increments the counter and uses
//! the new value, big-endian, as a 4-byte AES-GCM nonce. The nonce travels in
//! front of the ciphertext, so a [`Decryptor`] keeps no state and tolerates
//! loss and reordering.
//!
//! # Security
//!
//! - Nonce uniqueness: the counter only moves forward and the encryptor
//!   refuses to seal more than `2^32 - 1` messages under one key, so no nonce
//!   is ever produced twice by one encryptor.
//! - The 4-byte nonce is a wire-compatibility constraint. AES-GCM derives its
//!   counter block from a non-96-bit nonce through GHASH, which is standard
//!   but uncommon; per-key message volume stays bounded by the counter range.
//! - Integrity: any modification of nonce, ciphertext or tag fails with
//!   [`CryptoError::AuthenticationFailed`].

use aes_gcm::{
    AesGcm,
    aead::{Aead, KeyInit, consts::U4, generic_array::GenericArray},
    aes::Aes256,
};
use tether_proto::{NONCE_SIZE, SealedMessage, sealed_len};

use crate::error::{CryptoError, Result};

/// AES-256-GCM with the 4-byte wire nonce and a 128-bit tag.
type Cipher = AesGcm<Aes256, U4>;

/// Size of the symmetric key (the raw X25519 output)
pub const KEY_SIZE: usize = 32;

/// Most messages one key may seal before nonces would repeat.
pub const MAX_MESSAGES_PER_KEY: u64 = u32::MAX as u64;

/// Seals outbound messages. Implementations own their nonce state.
pub trait MessageEncryptor: Send {
    /// Size of the sealed message for a plaintext of `plaintext_len` bytes.
    fn sealed_len(&self, plaintext_len: usize) -> usize;

    /// Encrypt one message, returning `nonce || ciphertext || tag`.
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Opens inbound messages. Stateless with respect to message order.
pub trait MessageDecryptor: Send + Sync {
    /// Decrypt one sealed message.
    fn open(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Counter-nonce AES-GCM encryptor.
pub struct Encryptor {
    cipher: Cipher,
    counter: u32,
    sealed: u64,
}

impl Encryptor {
    /// Create an encryptor keyed by `key` whose counter starts at
    /// `nonce_seed`. The seed must come from a cryptographically secure
    /// source.
    pub fn new(key: &[u8], nonce_seed: u32) -> Result<Self> {
        Ok(Self { cipher: cipher(key)?, counter: nonce_seed, sealed: 0 })
    }

    /// Encrypt `plaintext`.
    ///
    /// Increments the counter first, then seals with the new value.
    pub fn process(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.sealed >= MAX_MESSAGES_PER_KEY {
            return Err(CryptoError::NonceExhausted(self.sealed));
        }

        self.counter = self.counter.wrapping_add(1);
        self.sealed += 1;

        let nonce = self.counter.to_be_bytes();
        let ciphertext = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Number of messages sealed so far.
    pub fn sealed_count(&self) -> u64 {
        self.sealed
    }
}

impl MessageEncryptor for Encryptor {
    fn sealed_len(&self, plaintext_len: usize) -> usize {
        sealed_len(plaintext_len)
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.process(plaintext)
    }
}

/// AES-GCM decryptor reading the nonce from each message.
pub struct Decryptor {
    cipher: Cipher,
}

impl Decryptor {
    /// Create a decryptor keyed by `key`.
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self { cipher: cipher(key)? })
    }

    /// Decrypt `message`, failing with
    /// [`CryptoError::AuthenticationFailed`] if it was tampered with,
    /// truncated, or sealed under another key.
    pub fn process(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sealed =
            SealedMessage::decode(message).map_err(|_| CryptoError::AuthenticationFailed)?;

        self.cipher
            .decrypt(GenericArray::from_slice(&sealed.nonce), sealed.ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl MessageDecryptor for Decryptor {
    fn open(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.process(message)
    }
}

fn cipher(key: &[u8]) -> Result<Cipher> {
    Cipher::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })
}
