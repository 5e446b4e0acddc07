//! Mux frame: `[mux_id: i32 BE][payload]`.
//!
//! The demultiplexer reads only the 4-byte prefix to route a message; the
//! payload is handed to the registered handler untouched.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Identifier of one logical sub-channel inside a multiplexed stream.
///
/// `-1` is reserved for channel-negotiation control messages and is never
/// handed out as a channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MuxId(i32);

impl MuxId {
    /// Sentinel id that introduces a control message.
    pub const CONTROL: Self = Self(-1);

    /// Wrap a raw id.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// True for the reserved control sentinel.
    pub const fn is_control(self) -> bool {
        self.0 == Self::CONTROL.0
    }

    /// Big-endian wire encoding.
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for MuxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for MuxId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// Fixed 4-byte mux header (Big Endian).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MuxHeader {
    mux_id: [u8; 4],
}

impl MuxHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 4;

    /// Create a header routing to `id`.
    pub const fn new(id: MuxId) -> Self {
        Self { mux_id: id.to_bytes() }
    }

    /// Routed channel id.
    pub const fn mux_id(&self) -> MuxId {
        MuxId(i32::from_be_bytes(self.mux_id))
    }

    /// Serialized header bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.mux_id
    }

    /// Split a mux frame into its channel id and payload (zero-copy).
    pub fn split(message: &[u8]) -> Result<(MuxId, &[u8])> {
        let (header, payload) = Self::ref_from_prefix(message).map_err(|_| {
            ProtocolError::Truncated {
                frame: "mux frame",
                expected: Self::SIZE,
                actual: message.len(),
            }
        })?;
        Ok((header.mux_id(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reads_big_endian_id() {
        let message = [0x00, 0x00, 0x01, 0x02, 0xaa, 0xbb];
        let (id, payload) = MuxHeader::split(&message).unwrap();
        assert_eq!(id, MuxId::new(0x0102));
        assert_eq!(payload, &[0xaa, 0xbb]);
    }

    #[test]
    fn split_accepts_empty_payload() {
        let bytes = MuxId::new(9).to_bytes();
        let (id, payload) = MuxHeader::split(&bytes).unwrap();
        assert_eq!(id.get(), 9);
        assert!(payload.is_empty());
    }

    #[test]
    fn split_rejects_short_frames() {
        let err = MuxHeader::split(&[0, 0, 1]).unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { frame: "mux frame", expected: 4, actual: 3 });
    }

    #[test]
    fn control_sentinel_is_all_ones() {
        assert_eq!(MuxHeader::new(MuxId::CONTROL).to_bytes(), [0xff; 4]);
        assert!(MuxId::new(-1).is_control());
        assert!(!MuxId::new(0).is_control());
    }
}
