//! Error types for handler trees.
//!
//! Errors fall into four families, and callers are expected to treat them
//! differently:
//!
//! - Desynchronization ([`Error::Protocol`], [`Error::UnknownChannel`], ...):
//!   the peer sent something this side cannot place. Message alignment is
//!   lost, so the connection is done.
//! - Security ([`Error::Crypto`]): a tag or signature did not verify. Same
//!   outcome as desynchronization, but worth reporting separately since it
//!   may be an attack.
//! - Usage ([`Error::Usage`]): local code called the API wrong. Fails fast at
//!   the call site.
//! - Transport ([`Error::Transport`]): the raw channel or a writer failed.
//!   Propagates to whoever called `send`.

use tether_crypto::CryptoError;
use tether_proto::{MuxId, ProtocolError, ProtocolId, RequestId};
use thiserror::Error;

/// Failures of the leaf transport or of message assembly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Raw channel no longer accepts messages
    #[error("raw channel closed")]
    ChannelClosed,

    /// Writers produced a different number of bytes than declared
    #[error("length mismatch: declared {declared} bytes, writers produced {written}")]
    LengthMismatch {
        /// Length passed to `send`
        declared: usize,
        /// Bytes the writers actually produced
        written: usize,
    },

    /// Message exceeds the configured maximum
    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the message
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// A writer function failed
    #[error("writer failed: {0}")]
    Writer(String),
}

/// Local API misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// Application data arrived or was sent with no downstream handler
    #[error("no downstream handler registered")]
    NoDownstream,

    /// A downstream handler is already registered
    #[error("downstream handler already registered")]
    DownstreamAlreadySet,

    /// Application data sent before the handshake completed
    #[error("secure channel is not connected")]
    NotConnected,

    /// Mux id is already registered
    #[error("mux id {0} is already registered")]
    DuplicateMuxId(MuxId),

    /// Mux id is not registered
    #[error("mux id {0} is not registered")]
    UnregisteredMuxId(MuxId),

    /// Mux id -1 is reserved for negotiation control messages
    #[error("mux id {0} is reserved")]
    ReservedMuxId(MuxId),

    /// Operation is not valid in the current state
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        /// State the connection was in
        state: &'static str,
        /// Operation attempted
        operation: &'static str,
    },

    /// Protocol id has no registered suite
    #[error("protocol {0} is not registered")]
    UnsupportedProtocol(ProtocolId),

    /// Answering a handshake needs a signer
    #[error("no handshake signer configured")]
    MissingSigner,

    /// Opening a handshake needs a verifier
    #[error("no handshake verifier configured")]
    MissingVerifier,

    /// Every request id has been handed out
    #[error("request ids exhausted")]
    RequestIdsExhausted,

    /// Every channel id has been handed out
    #[error("channel ids exhausted")]
    ChannelIdsExhausted,
}

/// Top-level error for handler trees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Inbound bytes do not parse
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Inbound message addressed to a channel that is not registered
    #[error("unknown channel {0}")]
    UnknownChannel(MuxId),

    /// Peer allocated a channel id that is already in use
    #[error("channel {0} allocated twice")]
    DuplicateChannel(MuxId),

    /// Allocation reply names a request that is not pending
    #[error("no pending open request {0}")]
    UnmatchedRequest(RequestId),

    /// Handshake names a protocol this side does not support
    #[error("unknown protocol {0}")]
    UnknownProtocol(ProtocolId),

    /// Message arrived in a state that cannot accept it
    #[error("unexpected message in state {state}")]
    UnexpectedMessage {
        /// State the connection was in
        state: &'static str,
    },

    /// Authentication or key agreement failed
    #[error("security error: {0}")]
    Crypto(#[from] CryptoError),

    /// Local API misuse
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// Transport or writer failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Counterpart was dropped before completing
    #[error("{0} abandoned before completion")]
    Abandoned(&'static str),

    /// Endpoint already failed on an earlier message
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl Error {
    /// Peer and this side no longer agree on message framing or state.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::UnknownChannel(_)
                | Self::DuplicateChannel(_)
                | Self::UnmatchedRequest(_)
                | Self::UnknownProtocol(_)
                | Self::UnexpectedMessage { .. }
        )
    }

    /// Authentication failure; possibly an active attacker.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }

    /// Connection cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        self.is_desync() || self.is_security() || matches!(self, Self::ConnectionFailed(_))
    }
}

/// Result type alias for handler operations
pub type Result<T> = std::result::Result<T, Error>;
