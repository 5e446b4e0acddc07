//! Error types for the Tether wire formats.
//!
//! Every variant describes a way the byte stream can stop making sense. None
//! of them are recoverable at the layer that detects them: once a frame fails
//! to parse, message alignment with the peer can no longer be trusted.

use thiserror::Error;

/// Wire-level errors raised while decoding or validating frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Message is shorter than the fixed layout requires
    #[error("{frame} truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Name of the frame being decoded
        frame: &'static str,
        /// Minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Fixed-size frame carries bytes past its end
    #[error("{frame} has trailing bytes: expected exactly {expected} bytes, got {actual}")]
    TrailingBytes {
        /// Name of the frame being decoded
        frame: &'static str,
        /// Exact size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Negotiation message starts with an unknown discriminator byte
    #[error("unknown negotiation discriminator: {0:#04x}")]
    UnknownDiscriminator(u8),

    /// Control frame does not start with the control sentinel
    #[error("control frame sentinel mismatch: expected -1, got {0}")]
    InvalidSentinel(i32),

    /// Control frame carries a cookie this side does not understand
    #[error("unknown control cookie: {0}")]
    UnknownCookie(i32),

    /// A payload frame is addressed to the reserved control id
    #[error("mux id {0} is reserved for control messages")]
    ReservedMuxId(i32),

    /// Handshake carries no public key bytes
    #[error("handshake message carries an empty public key")]
    EmptyPublicKey,
}

/// Convenient Result type alias for wire operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
