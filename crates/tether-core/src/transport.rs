//! Transport primitive: senders, handlers and the leaf of the tree.
//!
//! A handler tree moves whole messages. Inbound, the root receives a message
//! and each layer strips its header before handing the rest to the layer
//! below. Outbound, each layer prepends its header and forwards to the layer
//! above, until the [`LeafSender`] hands the finished message to the
//! [`RawChannel`].
//!
//! ```text
//!               outbound                      inbound
//!   app ──▶ Sender(+mux id) ──▶ ...      Endpoint::deliver ──▶ Handler
//!                     │                                          │ strip header
//!                     ▼                                          ▼
//!              LeafSender ──▶ RawChannel              child Handler ──▶ app
//! ```
//!
//! # Sending
//!
//! A send declares its total length up front and supplies an ordered list of
//! [`Writer`]s. The leaf allocates exactly that many bytes once and runs the
//! writers in order, so intermediate layers never copy the payload to add a
//! header. If the writers produce more or fewer bytes than declared, or any
//! writer fails, nothing is sent.
//!
//! # Invariants
//!
//! - One `send` call produces exactly one message, or none on error
//! - Concurrent sends build their messages in private buffers and never
//!   interleave
//! - Inbound delivery for one tree is single-threaded

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, Result, TransportError};

/// Writes one region of an outbound message.
pub type Writer<'a> = Box<dyn FnOnce(&mut BytesMut) -> Result<()> + 'a>;

/// Writer that copies `bytes`.
pub fn bytes_writer(bytes: &[u8]) -> Writer<'_> {
    Box::new(move |out: &mut BytesMut| {
        out.put_slice(bytes);
        Ok(())
    })
}

/// Writer list with `header` placed before `writers`.
///
/// Intermediate senders forward `length + header.len()` together with this
/// list to the sender above them.
pub fn prefixed<'a, const N: usize>(header: [u8; N], writers: Vec<Writer<'a>>) -> Vec<Writer<'a>> {
    let mut all: Vec<Writer<'a>> = Vec::with_capacity(writers.len() + 1);
    all.push(Box::new(move |out: &mut BytesMut| {
        out.put_slice(&header);
        Ok(())
    }));
    all.extend(writers);
    all
}

/// Run `writers` into a fresh buffer of exactly `length` bytes.
pub fn assemble(length: usize, writers: Vec<Writer<'_>>) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(length);
    for writer in writers {
        writer(&mut out)?;
        if out.len() > length {
            return Err(TransportError::LengthMismatch { declared: length, written: out.len() }.into());
        }
    }
    if out.len() != length {
        return Err(TransportError::LengthMismatch { declared: length, written: out.len() }.into());
    }
    Ok(out)
}

/// Capability to emit one complete outbound message.
///
/// A sender is not a connection: it holds no session state of its own beyond
/// the header it adds.
pub trait Sender: Send + Sync {
    /// Send one message of exactly `length` bytes built by `writers`.
    fn send(&self, length: usize, writers: Vec<Writer<'_>>) -> Result<()>;

    /// Send `message` as-is.
    fn send_message(&self, message: &[u8]) -> Result<()> {
        self.send(message.len(), vec![bytes_writer(message)])
    }
}

/// Protocol logic bound into a handler tree.
///
/// `connect` is called once per handler instance when the handler is placed
/// in the tree. It returns the connection value: whatever the handler (and
/// the application using it) needs to send messages upstream later.
/// `on_receive` is then called for every inbound message addressed to this
/// handler, with that same value.
pub trait Handler: Send + Sync + 'static {
    /// Per-instance connection value.
    type Connection: Clone + Send + Sync + 'static;

    /// Bind this handler to `upstream`.
    fn connect(&self, upstream: Arc<dyn Sender>) -> Self::Connection;

    /// Process one inbound message.
    ///
    /// `message` is only borrowed for the call. Any error fails the whole
    /// tree.
    fn on_receive(&self, connection: &Self::Connection, message: &[u8]) -> Result<()>;
}

/// Type-erased connected handler, as stored in registration tables.
pub(crate) trait Inbound: Send + Sync {
    fn on_receive(&self, message: &[u8]) -> Result<()>;
}

struct Bound<H: Handler> {
    handler: H,
    connection: H::Connection,
}

impl<H: Handler> Inbound for Bound<H> {
    fn on_receive(&self, message: &[u8]) -> Result<()> {
        self.handler.on_receive(&self.connection, message)
    }
}

/// Connect `handler` to `upstream`, returning its inbound half and its
/// connection value.
pub(crate) fn bind<H: Handler>(
    handler: H,
    upstream: Arc<dyn Sender>,
) -> (Arc<dyn Inbound>, H::Connection) {
    let connection = handler.connect(upstream);
    let inbound: Arc<dyn Inbound> = Arc::new(Bound { handler, connection: connection.clone() });
    (inbound, connection)
}

/// The real transport underneath a handler tree.
pub trait RawChannel: Send + Sync + 'static {
    /// Hand one complete message to the transport.
    fn transmit(&self, message: Bytes) -> std::result::Result<(), TransportError>;
}

impl RawChannel for tokio::sync::mpsc::UnboundedSender<Bytes> {
    fn transmit(&self, message: Bytes) -> std::result::Result<(), TransportError> {
        self.send(message).map_err(|_| TransportError::ChannelClosed)
    }
}

/// Transport limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest message accepted in either direction
    pub max_message_size: usize,
}

impl TransportConfig {
    /// Default maximum message size (16 MiB)
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { max_message_size: Self::DEFAULT_MAX_MESSAGE_SIZE }
    }
}

/// Sender at the bottom of the tree; the only one that touches the
/// [`RawChannel`].
pub struct LeafSender<T: RawChannel> {
    channel: T,
    config: TransportConfig,
}

impl<T: RawChannel> LeafSender<T> {
    /// Leaf over `channel`.
    pub fn new(channel: T, config: TransportConfig) -> Self {
        Self { channel, config }
    }

    /// Leaf over `channel`, as a shared upstream for a root handler.
    pub fn shared(channel: T, config: TransportConfig) -> Arc<dyn Sender> {
        Arc::new(Self::new(channel, config))
    }
}

impl<T: RawChannel> Sender for LeafSender<T> {
    fn send(&self, length: usize, writers: Vec<Writer<'_>>) -> Result<()> {
        if length > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: length,
                max: self.config.max_message_size,
            }
            .into());
        }

        let message = assemble(length, writers)?;
        trace!(length, "transmit");
        self.channel.transmit(message.freeze())?;
        Ok(())
    }
}

impl<T: RawChannel> fmt::Debug for LeafSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafSender").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Root of a handler tree.
///
/// Owns the root handler and its connection value. Feed every inbound
/// message from the raw transport to [`Endpoint::deliver`]. The first error
/// fails the endpoint for good: later deliveries return
/// [`Error::ConnectionFailed`] without touching the handlers.
pub struct Endpoint<H: Handler> {
    handler: H,
    connection: H::Connection,
    config: TransportConfig,
    failure: Mutex<Option<Error>>,
}

impl<H: Handler> Endpoint<H> {
    /// Connect `handler` to `upstream` and wrap it as a tree root.
    pub fn connect(handler: H, upstream: Arc<dyn Sender>, config: TransportConfig) -> Self {
        let connection = handler.connect(upstream);
        Self { handler, connection, config, failure: Mutex::new(None) }
    }

    /// Connection value of the root handler.
    pub fn connection(&self) -> &H::Connection {
        &self.connection
    }

    /// Root handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Error that failed this endpoint, if any.
    pub fn failure(&self) -> Option<Error> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// True once any delivery has failed.
    pub fn is_failed(&self) -> bool {
        self.failure().is_some()
    }

    /// Push one inbound message down the tree.
    pub fn deliver(&self, message: &[u8]) -> Result<()> {
        if let Some(failure) = self.failure() {
            return Err(Error::ConnectionFailed(failure.to_string()));
        }

        let result = if message.len() > self.config.max_message_size {
            Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.config.max_message_size,
            }
            .into())
        } else {
            trace!(length = message.len(), "deliver");
            self.handler.on_receive(&self.connection, message)
        };

        if let Err(err) = &result {
            warn!(error = %err, security = err.is_security(), "connection failed");
            *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
        }
        result
    }
}

impl<H: Handler> fmt::Debug for Endpoint<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .field("failure", &self.failure())
            .finish_non_exhaustive()
    }
}
