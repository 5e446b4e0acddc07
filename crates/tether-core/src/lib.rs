//! Tether transport core
//!
//! Moves opaque binary messages across one raw bidirectional channel (a
//! host/enclave boundary, or an attested remote peer) and builds everything
//! else by composing small handlers over it.
//!
//! # Architecture
//!
//! A handler tree is rooted at an [`Endpoint`] whose upstream is a
//! [`LeafSender`] over the real transport. Every layer consumes a fixed
//! header from each inbound message and prepends one to each outbound
//! message, so message boundaries are never lost:
//!
//! ```text
//! RawChannel ◀──▶ Endpoint
//!                   └── EncryptedHandler       [nonce][ciphertext][tag]
//!                         └── ChannelInitiatingHandler   [kind][...]
//!                               ├── channel 0 handler
//!                               └── channel 1 handler
//! ```
//!
//! The secure channel and the multiplexers are ordinary handlers and compose
//! in any order, with or without each other.
//!
//! # Components
//!
//! - [`transport`]: `Sender`/`Handler` primitive, leaf sender, endpoint
//! - [`secure`]: handshake and per-message AEAD state machine
//! - [`mux`]: static demultiplexer keyed by mux id
//! - [`channel`]: dynamic channel negotiation (initiator and responder)
//! - [`signal`]: handshake completion and pending channel results
//! - [`mod@env`]: entropy source
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod env;
pub mod error;
pub mod mux;
pub mod secure;
pub mod signal;
pub mod transport;

pub use channel::{
    Channel, ChannelFactory, ChannelInitiatingHandler, ChannelInitiator, ChannelRespondingHandler,
    ChannelResponder,
};
pub use env::{Entropy, SystemEntropy};
pub use error::{Error, Result, TransportError, UsageError};
pub use mux::{MuxConnection, MuxingHandler};
pub use secure::{EncryptedConnection, EncryptedHandler, SecureConfig};
pub use signal::{HandshakeSignal, PendingChannel};
pub use transport::{
    Endpoint, Handler, LeafSender, RawChannel, Sender, TransportConfig, Writer, assemble,
    bytes_writer, prefixed,
};
