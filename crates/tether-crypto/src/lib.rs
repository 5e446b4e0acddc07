//! Tether Cryptographic Primitives
//!
//! Building blocks for the secure-channel layer. Functions here are pure:
//! every piece of randomness (ephemeral private keys, nonce seeds) is passed
//! in by the caller, which keeps handshakes reproducible under a seeded test
//! environment.
//!
//! # Handshake to ciphertext
//!
//! ```text
//! random seed ──▶ KeyAgreement (X25519) ──▶ public key ──▶ peer
//!                       │
//!                       ▼ peer public key
//!                 SharedSecret (32 bytes, zeroized on drop)
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   Encryptor (AES-GCM,        Decryptor (AES-GCM,
//!   counter nonce)             nonce from message)
//! ```
//!
//! The secret keys the cipher directly; there is no derivation step.
//!
//! # Security
//!
//! - Confidentiality and integrity: AES-GCM with a 128-bit tag
//! - Nonce uniqueness: monotonic counter, hard cap per key
//! - Authentication: the answering side signs its ephemeral key through
//!   [`HandshakeSigner`]; the opening side checks it through
//!   [`HandshakeVerifier`]
//! - Hygiene: private scalars and shared secrets are zeroized on drop

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod error;
pub mod identity;
pub mod key_agreement;
pub mod suite;

pub use aead::{Decryptor, Encryptor, MessageDecryptor, MessageEncryptor};
pub use error::CryptoError;
pub use identity::{Ed25519Signer, Ed25519Verifier, HandshakeSigner, HandshakeVerifier};
pub use key_agreement::{KeyAgreement, SharedSecret, X25519KeyAgreement};
pub use suite::{ProtocolRegistry, ProtocolSuite};
