//! Channel negotiation frames.
//!
//! Messages travelling from the initiating side to the responding side start
//! with a one-byte discriminator:
//!
//! ```text
//! Open     [0x00][request_id: i32]
//! Close    [0x01][channel_id: i32]
//! Payload  [0x02][mux_id: i32][payload]
//! ```
//!
//! Messages travelling back are plain mux frames. The reserved id `-1`
//! introduces a control frame; the only one defined is the allocation reply:
//!
//! ```text
//! [-1: i32][cookie: i32][request_id: i32][channel_id: i32]
//! ```

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    errors::{ProtocolError, Result},
    mux::MuxId,
};

/// Correlates an Open request with its allocation reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(i32);

impl RequestId {
    /// Wrap a raw id.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Leading byte of an initiator-to-responder message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Discriminator {
    /// Request a new channel
    Open = 0,
    /// Tear down a channel
    Close = 1,
    /// Mux frame for an established channel
    Payload = 2,
}

impl Discriminator {
    /// Size of the discriminator on the wire
    pub const SIZE: usize = 1;

    /// Parse a discriminator byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Open),
            1 => Some(Self::Close),
            2 => Some(Self::Payload),
            _ => None,
        }
    }

    /// Wire byte.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded initiator-to-responder message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationMessage<'a> {
    /// Request a new channel, correlated by `request_id`
    Open {
        /// Caller-chosen correlation id
        request_id: RequestId,
    },
    /// The initiator removed `channel_id`
    Close {
        /// Channel being torn down
        channel_id: MuxId,
    },
    /// A mux frame for an established channel (header included)
    Payload(&'a [u8]),
}

/// Encoded size of Open and Close messages
pub const CONTROL_MESSAGE_SIZE: usize = Discriminator::SIZE + 4;

impl<'a> NegotiationMessage<'a> {
    /// Decode a message. Open and Close must be exactly
    /// [`CONTROL_MESSAGE_SIZE`] bytes.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let Some((&first, rest)) = bytes.split_first() else {
            return Err(ProtocolError::Truncated {
                frame: "negotiation message",
                expected: Discriminator::SIZE,
                actual: 0,
            });
        };

        match Discriminator::from_u8(first) {
            Some(Discriminator::Open) => {
                let raw = read_control_i32("open message", bytes, rest)?;
                Ok(Self::Open { request_id: RequestId(raw) })
            },
            Some(Discriminator::Close) => {
                let raw = read_control_i32("close message", bytes, rest)?;
                Ok(Self::Close { channel_id: MuxId::new(raw) })
            },
            Some(Discriminator::Payload) => Ok(Self::Payload(rest)),
            None => Err(ProtocolError::UnknownDiscriminator(first)),
        }
    }

    /// Encode an Open message.
    pub fn open(request_id: RequestId) -> [u8; CONTROL_MESSAGE_SIZE] {
        encode_control(Discriminator::Open, request_id.get())
    }

    /// Encode a Close message.
    pub fn close(channel_id: MuxId) -> [u8; CONTROL_MESSAGE_SIZE] {
        encode_control(Discriminator::Close, channel_id.get())
    }
}

fn read_control_i32(frame: &'static str, whole: &[u8], body: &[u8]) -> Result<i32> {
    let expected = CONTROL_MESSAGE_SIZE;
    let raw: [u8; 4] = body.try_into().map_err(|_| {
        if whole.len() < expected {
            ProtocolError::Truncated { frame, expected, actual: whole.len() }
        } else {
            ProtocolError::TrailingBytes { frame, expected, actual: whole.len() }
        }
    })?;
    Ok(i32::from_be_bytes(raw))
}

fn encode_control(discriminator: Discriminator, value: i32) -> [u8; CONTROL_MESSAGE_SIZE] {
    let mut out = [0u8; CONTROL_MESSAGE_SIZE];
    out[0] = discriminator.to_u8();
    out[1..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Cookie identifying a control frame as a channel allocation.
pub const ALLOCATION_COOKIE: i32 = 0;

/// Fixed 16-byte allocation reply (Big Endian).
///
/// Sent by the responding side after it registered a channel for an Open
/// request. No trailing bytes are permitted.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AllocationReply {
    sentinel: [u8; 4],
    cookie: [u8; 4],
    request_id: [u8; 4],
    channel_id: [u8; 4],
}

impl AllocationReply {
    /// Size of the serialized reply
    pub const SIZE: usize = 16;

    /// Reply correlating `request_id` with the freshly allocated `channel_id`.
    pub const fn new(request_id: RequestId, channel_id: MuxId) -> Self {
        Self {
            sentinel: MuxId::CONTROL.to_bytes(),
            cookie: ALLOCATION_COOKIE.to_be_bytes(),
            request_id: request_id.get().to_be_bytes(),
            channel_id: channel_id.to_bytes(),
        }
    }

    /// Parse a reply from a complete control frame (sentinel included).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let reply = Self::read_from_bytes(bytes).map_err(|_| {
            if bytes.len() < Self::SIZE {
                ProtocolError::Truncated {
                    frame: "allocation reply",
                    expected: Self::SIZE,
                    actual: bytes.len(),
                }
            } else {
                ProtocolError::TrailingBytes {
                    frame: "allocation reply",
                    expected: Self::SIZE,
                    actual: bytes.len(),
                }
            }
        })?;

        let sentinel = i32::from_be_bytes(reply.sentinel);
        if sentinel != MuxId::CONTROL.get() {
            return Err(ProtocolError::InvalidSentinel(sentinel));
        }

        let cookie = reply.cookie();
        if cookie != ALLOCATION_COOKIE {
            return Err(ProtocolError::UnknownCookie(cookie));
        }

        Ok(reply)
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Control cookie
    pub const fn cookie(&self) -> i32 {
        i32::from_be_bytes(self.cookie)
    }

    /// Request this reply answers
    pub const fn request_id(&self) -> RequestId {
        RequestId(i32::from_be_bytes(self.request_id))
    }

    /// Allocated channel
    pub const fn channel_id(&self) -> MuxId {
        MuxId::new(i32::from_be_bytes(self.channel_id))
    }
}
