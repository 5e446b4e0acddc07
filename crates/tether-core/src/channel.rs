//! Dynamic channel negotiation.
//!
//! One side (the initiator) asks for channels; the other (the responder)
//! allocates their ids. Both keep a [`MuxConnection`] underneath, so once a
//! channel exists traffic flows exactly as with static registration.
//!
//! # Protocol
//!
//! ```text
//! initiator                                     responder
//!     │  Open [0][request_id]                       │
//!     │────────────────────────────────────────────▶│ factory.create(id)
//!     │                                             │ id = next_channel++
//!     │  [-1][cookie][request_id][channel_id]       │
//!     │◀────────────────────────────────────────────│
//!     │  Payload [2][channel_id][data]              │
//!     │────────────────────────────────────────────▶│
//!     │  [channel_id][data]                         │
//!     │◀────────────────────────────────────────────│
//!     │  Close [1][channel_id]                      │
//!     │────────────────────────────────────────────▶│ factory.closed(id)
//! ```
//!
//! # Invariants
//!
//! - Request ids and channel ids are allocated monotonically from 0 and never
//!   reused
//! - Each request id is resolved at most once; a reply for an unknown request
//!   fails the connection
//! - The responder registers a channel before announcing it, and hands it to
//!   the application only after the allocation reply is sent

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicI32, Ordering},
    },
};

use tether_proto::{
    AllocationReply, Discriminator, MuxHeader, MuxId, NegotiationMessage, ProtocolError, RequestId,
};
use tracing::debug;

use crate::{
    error::{Error, Result, UsageError},
    mux::MuxConnection,
    signal::{PendingChannel, pending_channel},
    transport::{Handler, Sender, Writer, prefixed},
};

/// A negotiated logical channel: its id and the connection value of the
/// handler registered under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel<C> {
    id: MuxId,
    connection: C,
}

impl<C> Channel<C> {
    /// Pair `id` with `connection`.
    pub fn new(id: MuxId, connection: C) -> Self {
        Self { id, connection }
    }

    /// Channel id.
    pub fn id(&self) -> MuxId {
        self.id
    }

    /// Connection value of the registered handler.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Take the connection value.
    pub fn into_connection(self) -> C {
        self.connection
    }
}

fn next_id(counter: &AtomicI32) -> Option<i32> {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1)).ok()
}

/// Registers a negotiated channel once its id is known.
type PendingOpen = Box<dyn FnOnce(&MuxConnection, MuxId) -> Result<()> + Send>;

/// Handler for the side that requests channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelInitiatingHandler;

impl Handler for ChannelInitiatingHandler {
    type Connection = ChannelInitiator;

    fn connect(&self, upstream: Arc<dyn Sender>) -> ChannelInitiator {
        ChannelInitiator::new(upstream)
    }

    fn on_receive(&self, connection: &ChannelInitiator, message: &[u8]) -> Result<()> {
        connection.on_receive(message)
    }
}

/// Requesting side of channel negotiation.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChannelInitiator {
    inner: Arc<InitiatorInner>,
}

struct InitiatorInner {
    upstream: Arc<dyn Sender>,
    mux: MuxConnection,
    next_request: AtomicI32,
    pending: Mutex<HashMap<RequestId, PendingOpen>>,
}

impl ChannelInitiator {
    /// Initiator sending through `upstream`.
    pub fn new(upstream: Arc<dyn Sender>) -> Self {
        let payload = Arc::new(PayloadSender { upstream: Arc::clone(&upstream) });
        Self {
            inner: Arc::new(InitiatorInner {
                upstream,
                mux: MuxConnection::new(payload),
                next_request: AtomicI32::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<RequestId, PendingOpen>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the peer for a channel and register `handler` on it once
    /// allocated.
    ///
    /// Returns immediately. The result resolves when the allocation reply
    /// arrives.
    pub fn add_downstream<H: Handler>(&self, handler: H) -> Result<PendingChannel<H::Connection>> {
        let request_id =
            RequestId::new(next_id(&self.inner.next_request).ok_or(UsageError::RequestIdsExhausted)?);
        let (resolver, pending) = pending_channel(request_id);

        let open: PendingOpen = Box::new(move |mux: &MuxConnection, id: MuxId| {
            let connection = mux.add_downstream(id, handler)?;
            // Nobody waiting; the channel stays registered regardless.
            let _ = resolver.send((id, connection));
            Ok(())
        });
        self.pending().insert(request_id, open);

        if let Err(err) = self.inner.upstream.send_message(&NegotiationMessage::open(request_id)) {
            self.pending().remove(&request_id);
            return Err(err);
        }
        debug!(%request_id, "channel requested");
        Ok(pending)
    }

    /// Close channel `id` locally and tell the peer.
    ///
    /// Unregistering is the claim: of several concurrent calls for one id,
    /// only the one that removed it sends Close.
    pub fn remove_downstream(&self, id: MuxId) -> Result<()> {
        self.inner.mux.remove_downstream(id)?;
        self.inner.upstream.send_message(&NegotiationMessage::close(id))?;
        debug!(%id, "channel close sent");
        Ok(())
    }

    /// Snapshot of open channel ids, sorted.
    pub fn mux_ids(&self) -> Vec<MuxId> {
        self.inner.mux.mux_ids()
    }

    /// Open requests still waiting for an allocation reply.
    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }

    /// Process one message from the responder.
    pub fn on_receive(&self, message: &[u8]) -> Result<()> {
        let (id, _) = MuxHeader::split(message)?;
        if id.is_control() {
            self.on_allocation(&AllocationReply::decode(message)?)
        } else {
            self.inner.mux.on_receive(message)
        }
    }

    fn on_allocation(&self, reply: &AllocationReply) -> Result<()> {
        let request_id = reply.request_id();
        let channel_id = reply.channel_id();
        if channel_id.is_control() {
            return Err(ProtocolError::ReservedMuxId(channel_id.get()).into());
        }
        if self.inner.mux.contains(channel_id) {
            return Err(Error::DuplicateChannel(channel_id));
        }

        let open = self.pending().remove(&request_id).ok_or(Error::UnmatchedRequest(request_id))?;
        open(&self.inner.mux, channel_id)?;
        debug!(%request_id, %channel_id, "channel allocated");
        Ok(())
    }
}

impl fmt::Debug for ChannelInitiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInitiator")
            .field("mux_ids", &self.mux_ids())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

/// Wraps channel traffic from the initiator in Payload messages.
struct PayloadSender {
    upstream: Arc<dyn Sender>,
}

impl Sender for PayloadSender {
    fn send(&self, length: usize, writers: Vec<Writer<'_>>) -> Result<()> {
        self.upstream.send(
            length + Discriminator::SIZE,
            prefixed([Discriminator::Payload.to_u8()], writers),
        )
    }
}

/// Application hook creating handlers for channels the peer opens.
pub trait ChannelFactory: Send + Sync + 'static {
    /// Handler type created per channel.
    type Handler: Handler;

    /// Create the handler for newly allocated channel `id`.
    fn create(&self, id: MuxId) -> Self::Handler;

    /// Channel registered and announced to the peer.
    fn opened(&self, channel: Channel<<Self::Handler as Handler>::Connection>) {
        let _ = channel;
    }

    /// Peer closed channel `id`.
    fn closed(&self, id: MuxId) {
        let _ = id;
    }
}

/// Handler for the side that allocates channels.
pub struct ChannelRespondingHandler<F: ChannelFactory> {
    factory: Arc<F>,
}

impl<F: ChannelFactory> ChannelRespondingHandler<F> {
    /// Responder creating channel handlers with `factory`.
    pub fn new(factory: F) -> Self {
        Self::shared(Arc::new(factory))
    }

    /// Responder using a factory the application keeps a handle to.
    pub fn shared(factory: Arc<F>) -> Self {
        Self { factory }
    }
}

impl<F: ChannelFactory> Handler for ChannelRespondingHandler<F> {
    type Connection = ChannelResponder<F>;

    fn connect(&self, upstream: Arc<dyn Sender>) -> ChannelResponder<F> {
        ChannelResponder::new(upstream, Arc::clone(&self.factory))
    }

    fn on_receive(&self, connection: &ChannelResponder<F>, message: &[u8]) -> Result<()> {
        connection.on_receive(message)
    }
}

impl<F: ChannelFactory> fmt::Debug for ChannelRespondingHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRespondingHandler").finish_non_exhaustive()
    }
}

/// Allocating side of channel negotiation.
///
/// Cheap to clone; clones share state.
pub struct ChannelResponder<F: ChannelFactory> {
    inner: Arc<ResponderInner<F>>,
}

impl<F: ChannelFactory> Clone for ChannelResponder<F> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct ResponderInner<F> {
    upstream: Arc<dyn Sender>,
    mux: MuxConnection,
    factory: Arc<F>,
    next_channel: AtomicI32,
}

impl<F: ChannelFactory> ChannelResponder<F> {
    /// Responder sending through `upstream`.
    pub fn new(upstream: Arc<dyn Sender>, factory: Arc<F>) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                mux: MuxConnection::new(Arc::clone(&upstream)),
                upstream,
                factory,
                next_channel: AtomicI32::new(0),
            }),
        }
    }

    /// Snapshot of open channel ids, sorted.
    pub fn mux_ids(&self) -> Vec<MuxId> {
        self.inner.mux.mux_ids()
    }

    /// Process one message from the initiator.
    pub fn on_receive(&self, message: &[u8]) -> Result<()> {
        match NegotiationMessage::decode(message)? {
            NegotiationMessage::Open { request_id } => self.open(request_id),
            NegotiationMessage::Close { channel_id } => self.close(channel_id),
            NegotiationMessage::Payload(frame) => {
                let (id, _) = MuxHeader::split(frame)?;
                if id.is_control() {
                    return Err(ProtocolError::ReservedMuxId(id.get()).into());
                }
                self.inner.mux.on_receive(frame)
            },
        }
    }

    fn open(&self, request_id: RequestId) -> Result<()> {
        let channel_id =
            MuxId::new(next_id(&self.inner.next_channel).ok_or(UsageError::ChannelIdsExhausted)?);
        let handler = self.inner.factory.create(channel_id);

        // Registered before the reply, so traffic the initiator sends as soon
        // as it learns the id always finds the channel here.
        let connection = self.inner.mux.add_downstream(channel_id, handler)?;
        let reply = AllocationReply::new(request_id, channel_id);
        if let Err(err) = self.inner.upstream.send_message(&reply.to_bytes()) {
            let _ = self.inner.mux.remove_downstream(channel_id);
            return Err(err);
        }
        debug!(%request_id, %channel_id, "channel opened");
        self.inner.factory.opened(Channel::new(channel_id, connection));
        Ok(())
    }

    fn close(&self, channel_id: MuxId) -> Result<()> {
        self.inner.mux.remove_downstream(channel_id).map_err(|_| Error::UnknownChannel(channel_id))?;
        debug!(%channel_id, "channel closed by peer");
        self.inner.factory.closed(channel_id);
        Ok(())
    }
}

impl<F: ChannelFactory> fmt::Debug for ChannelResponder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelResponder").field("mux_ids", &self.mux_ids()).finish_non_exhaustive()
    }
}
