//! Handshake request: `[protocol_id: i32 BE][ephemeral public key: rest]`.
//!
//! The reply travelling back to the initiator is a signed ephemeral public
//! key whose encoding belongs to the signing scheme, so it has no layout here.

use std::fmt;

use crate::errors::{ProtocolError, Result};

/// Selects the key agreement and cipher pairing for a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(i32);

impl ProtocolId {
    /// X25519 key agreement followed by AES-GCM
    pub const X25519_AES_GCM: Self = Self(0);

    /// Wrap a raw id.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded responder-bound handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRequest<'a> {
    /// Requested protocol suite
    pub protocol_id: ProtocolId,
    /// Initiator's raw ephemeral public key
    pub public_key: &'a [u8],
}

impl<'a> HandshakeRequest<'a> {
    /// Size of the protocol id prefix
    pub const HEADER_SIZE: usize = 4;

    /// Decode a handshake message.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let Some((id, public_key)) = bytes.split_first_chunk::<4>() else {
            return Err(ProtocolError::Truncated {
                frame: "handshake request",
                expected: Self::HEADER_SIZE,
                actual: bytes.len(),
            });
        };

        if public_key.is_empty() {
            return Err(ProtocolError::EmptyPublicKey);
        }

        Ok(Self { protocol_id: ProtocolId(i32::from_be_bytes(*id)), public_key })
    }

    /// Encoded size.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.public_key.len()
    }

    /// Append the encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.protocol_id.get().to_be_bytes());
        out.extend_from_slice(self.public_key);
    }

    /// Encoded bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn decode_splits_protocol_and_key() {
        let bytes = hex!("00000000 0102030405");
        let request = HandshakeRequest::decode(&bytes).unwrap();
        assert_eq!(request.protocol_id, ProtocolId::X25519_AES_GCM);
        assert_eq!(request.public_key, &hex!("0102030405"));
    }

    #[test]
    fn encode_matches_decode() {
        let key = [7u8; 32];
        let request = HandshakeRequest { protocol_id: ProtocolId::new(3), public_key: &key };
        let out = request.to_vec();

        assert_eq!(out.len(), request.encoded_len());
        assert_eq!(&out[..4], &[0, 0, 0, 3]);
        assert_eq!(HandshakeRequest::decode(&out).unwrap(), request);
    }

    #[test]
    fn encode_appends_after_existing_bytes() {
        let key = [1u8, 2];
        let request = HandshakeRequest { protocol_id: ProtocolId::new(-2), public_key: &key };
        let mut out = vec![0xee];
        request.encode_into(&mut out);

        assert_eq!(out, hex!("ee fffffffe 0102"));
    }

    #[test]
    fn decode_rejects_missing_key() {
        let bytes = hex!("00000000");
        assert_eq!(HandshakeRequest::decode(&bytes).unwrap_err(), ProtocolError::EmptyPublicKey);

        let bytes = hex!("0000");
        assert!(matches!(
            HandshakeRequest::decode(&bytes).unwrap_err(),
            ProtocolError::Truncated { expected: 4, actual: 2, .. }
        ));
    }
}
