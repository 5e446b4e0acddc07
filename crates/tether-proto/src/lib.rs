//! Wire formats for the Tether message transport.
//!
//! The raw channel underneath Tether already delimits messages, so nothing
//! here deals with framing a byte stream. Each layer of a handler tree owns a
//! small fixed header at the front of every message it carries:
//!
//! ```text
//! [sealed nonce][mux id][negotiation discriminator] ... application bytes
//! ```
//!
//! (outermost first, when all three layers are stacked). Fixed-size headers
//! are `zerocopy` structs over big-endian byte arrays, so parsing never copies
//! and never has invalid bit patterns.
//!
//! # Security
//!
//! Decoders are strict: fixed-size control frames reject trailing bytes, and
//! unknown discriminators or cookies are errors rather than ignored. A peer
//! that sends something unexpected has either a bug or hostile intent, and in
//! both cases message alignment can no longer be trusted.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod handshake;
pub mod mux;
pub mod negotiation;
pub mod sealed;

pub use errors::{ProtocolError, Result};
pub use handshake::{HandshakeRequest, ProtocolId};
pub use mux::{MuxHeader, MuxId};
pub use negotiation::{
    ALLOCATION_COOKIE, AllocationReply, CONTROL_MESSAGE_SIZE, Discriminator, NegotiationMessage,
    RequestId,
};
pub use sealed::{NONCE_SIZE, SealedMessage, TAG_SIZE, sealed_len};
