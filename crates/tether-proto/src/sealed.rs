//! Encrypted message: `[nonce: 4 bytes][ciphertext][tag: 16 bytes]`.
//!
//! The nonce is the sender's counter value, big-endian. It travels in the
//! clear so the receiver needs no counter of its own.

use crate::errors::{ProtocolError, Result};

/// Size of the nonce prefix
pub const NONCE_SIZE: usize = 4;

/// Size of the AEAD authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a sealed message carrying `plaintext_len` bytes.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    NONCE_SIZE + plaintext_len + TAG_SIZE
}

/// Borrowed view of an encrypted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedMessage<'a> {
    /// Nonce the sender used
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the tag
    pub ciphertext: &'a [u8],
}

impl<'a> SealedMessage<'a> {
    /// Split a message into nonce and ciphertext. Anything too short to hold
    /// a nonce and a tag is rejected.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < sealed_len(0) {
            return Err(ProtocolError::Truncated {
                frame: "sealed message",
                expected: sealed_len(0),
                actual: bytes.len(),
            });
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut raw = [0u8; NONCE_SIZE];
        raw.copy_from_slice(nonce);
        Ok(Self { nonce: raw, ciphertext })
    }

    /// Nonce as the sender's counter value.
    pub fn counter(&self) -> u32 {
        u32::from_be_bytes(self.nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_nonce() {
        let mut bytes = vec![0x00, 0x00, 0x01, 0x00];
        bytes.extend_from_slice(&[0xee; 20]);

        let sealed = SealedMessage::decode(&bytes).unwrap();
        assert_eq!(sealed.counter(), 256);
        assert_eq!(sealed.ciphertext.len(), 20);
    }

    #[test]
    fn decode_rejects_messages_without_tag() {
        let bytes = [0u8; NONCE_SIZE + TAG_SIZE - 1];
        assert!(matches!(
            SealedMessage::decode(&bytes).unwrap_err(),
            ProtocolError::Truncated { expected: 20, actual: 19, .. }
        ));
    }

    #[test]
    fn sealed_len_adds_overhead() {
        assert_eq!(sealed_len(5), 25);
    }
}
