//! Errors for secure-channel cryptography.
//!
//! These are kept apart from wire-format errors on purpose: a failed tag or
//! signature may mean someone is actively tampering with the channel, and
//! callers should be able to tell that from a plain bug.

use thiserror::Error;

/// Failures raised by ciphers, key agreement and identity hooks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag did not verify (tampered, truncated or wrong key)
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Handshake signature did not verify against the trusted identity
    #[error("handshake signature verification failed")]
    InvalidSignature,

    /// Signed handshake blob is too short to hold a signature and a key
    #[error("malformed signed key: expected more than {min} bytes, got {actual}")]
    MalformedSignedKey {
        /// Minimum size in bytes
        min: usize,
        /// Actual size received
        actual: usize,
    },

    /// Key material has the wrong size for the algorithm
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Size the algorithm requires
        expected: usize,
        /// Size supplied
        actual: usize,
    },

    /// Peer key agreement contribution was a low-order point
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,

    /// Encryptor has used every nonce available for its key
    #[error("nonce space exhausted after {0} messages")]
    NonceExhausted(u64),
}

/// Result type alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
