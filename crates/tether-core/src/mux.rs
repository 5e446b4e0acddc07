//! Demultiplexer: many logical channels over one message stream.
//!
//! Every message through a [`MuxingHandler`] starts with a 4-byte
//! [`MuxId`]. Outbound, each registered downstream handler sends through a
//! sender that prepends its id. Inbound, the id selects the handler and the
//! remainder is forwarded to it.
//!
//! ```text
//! [mux_id: i32][payload] ──▶ MuxConnection ──┬──▶ handler 0
//!                                            ├──▶ handler 1
//!                                            └──▶ handler 7
//! ```
//!
//! A message for an id with no handler fails the whole connection: the peer
//! believes a channel exists that this side does not know about.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tether_proto::{MuxHeader, MuxId};
use tracing::{debug, trace};

use crate::{
    error::{Error, Result, UsageError},
    transport::{Handler, Inbound, Sender, Writer, bind, prefixed},
};

/// Handler that demultiplexes by leading [`MuxId`].
///
/// Register downstream handlers on the [`MuxConnection`] returned by
/// `connect`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MuxingHandler;

impl Handler for MuxingHandler {
    type Connection = MuxConnection;

    fn connect(&self, upstream: Arc<dyn Sender>) -> MuxConnection {
        MuxConnection::new(upstream)
    }

    fn on_receive(&self, connection: &MuxConnection, message: &[u8]) -> Result<()> {
        connection.on_receive(message)
    }
}

enum Slot {
    /// Id claimed; the handler is still connecting
    Reserved,
    Ready(Arc<dyn Inbound>),
}

/// Registration table of one multiplexer.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct MuxConnection {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    upstream: Arc<dyn Sender>,
    channels: Mutex<HashMap<MuxId, Slot>>,
}

impl MuxConnection {
    /// Empty multiplexer sending through `upstream`.
    pub fn new(upstream: Arc<dyn Sender>) -> Self {
        Self { inner: Arc::new(MuxInner { upstream, channels: Mutex::new(HashMap::new()) }) }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<MuxId, Slot>> {
        self.inner.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect `handler` under `id` and return its connection value.
    ///
    /// Fails if `id` is already registered or is the reserved control id.
    pub fn add_downstream<H: Handler>(&self, id: MuxId, handler: H) -> Result<H::Connection> {
        if id.is_control() {
            return Err(UsageError::ReservedMuxId(id).into());
        }

        // Claim the id first; connecting may itself register channels.
        match self.channels().entry(id) {
            Entry::Occupied(_) => return Err(UsageError::DuplicateMuxId(id).into()),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Reserved);
            },
        }

        let sender = Arc::new(MuxSender { id, upstream: Arc::clone(&self.inner.upstream) });
        let (inbound, connection) = bind(handler, sender);

        if let Some(slot) = self.channels().get_mut(&id) {
            *slot = Slot::Ready(inbound);
        }
        debug!(%id, "channel registered");
        Ok(connection)
    }

    /// Unregister `id`. Later inbound messages for it fail the connection.
    pub fn remove_downstream(&self, id: MuxId) -> Result<()> {
        match self.channels().remove(&id) {
            Some(_) => {
                debug!(%id, "channel removed");
                Ok(())
            },
            None => Err(UsageError::UnregisteredMuxId(id).into()),
        }
    }

    /// True if `id` is registered.
    pub fn contains(&self, id: MuxId) -> bool {
        self.channels().contains_key(&id)
    }

    /// Snapshot of registered ids, sorted.
    pub fn mux_ids(&self) -> Vec<MuxId> {
        let mut ids: Vec<_> = self.channels().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Route one inbound message by its leading id.
    pub fn on_receive(&self, message: &[u8]) -> Result<()> {
        let (id, payload) = MuxHeader::split(message)?;

        let inbound = match self.channels().get(&id) {
            Some(Slot::Ready(inbound)) => Arc::clone(inbound),
            Some(Slot::Reserved) | None => return Err(Error::UnknownChannel(id)),
        };

        trace!(%id, length = payload.len(), "demux");
        inbound.on_receive(payload)
    }
}

impl std::fmt::Debug for MuxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxConnection").field("mux_ids", &self.mux_ids()).finish_non_exhaustive()
    }
}

/// Sender prefixing every message with one mux id.
struct MuxSender {
    id: MuxId,
    upstream: Arc<dyn Sender>,
}

impl Sender for MuxSender {
    fn send(&self, length: usize, writers: Vec<Writer<'_>>) -> Result<()> {
        self.upstream.send(length + MuxHeader::SIZE, prefixed(self.id.to_bytes(), writers))
    }
}
