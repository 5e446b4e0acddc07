//! Recording handlers for assertions.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tether_core::{Channel, ChannelFactory, Handler, Result, Sender};
use tether_proto::MuxId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Log = Arc<Mutex<Vec<Vec<u8>>>>;

/// Handler that records every message it receives, optionally echoing it
/// back upstream.
///
/// Clones share one log, so a test can keep a clone and hand the original to
/// the tree.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    log: Log,
    echo: bool,
}

impl RecordingHandler {
    /// Recorder that only records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder that also sends every message straight back.
    pub fn echo() -> Self {
        Self { log: Log::default(), echo: true }
    }

    /// Messages received so far, in order.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        lock(&self.log).clone()
    }
}

impl Handler for RecordingHandler {
    type Connection = Recorder;

    fn connect(&self, upstream: Arc<dyn Sender>) -> Recorder {
        Recorder { upstream, log: Arc::clone(&self.log) }
    }

    fn on_receive(&self, connection: &Recorder, message: &[u8]) -> Result<()> {
        lock(&self.log).push(message.to_vec());
        if self.echo {
            connection.send(message)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("received", &lock(&self.log).len())
            .field("echo", &self.echo)
            .finish()
    }
}

/// Connection value of a [`RecordingHandler`].
#[derive(Clone)]
pub struct Recorder {
    upstream: Arc<dyn Sender>,
    log: Log,
}

impl Recorder {
    /// Send `message` upstream.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        self.upstream.send_message(message)
    }

    /// Upstream sender.
    pub fn upstream(&self) -> &Arc<dyn Sender> {
        &self.upstream
    }

    /// Messages the handler received so far, in order.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        lock(&self.log).clone()
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder").field("received", &lock(&self.log).len()).finish_non_exhaustive()
    }
}

/// Channel factory creating a [`RecordingHandler`] per channel and keeping
/// track of what the peer opened and closed.
#[derive(Default)]
pub struct RecordingFactory {
    echo: bool,
    open: Mutex<BTreeMap<MuxId, Recorder>>,
    closed: Mutex<Vec<MuxId>>,
}

impl RecordingFactory {
    /// Factory whose channels only record.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory whose channels echo every message back.
    pub fn echo() -> Arc<Self> {
        Arc::new(Self { echo: true, ..Self::default() })
    }

    /// Recorder for open channel `id`.
    pub fn channel(&self, id: MuxId) -> Option<Recorder> {
        lock(&self.open).get(&id).cloned()
    }

    /// Ids of channels currently open, sorted.
    pub fn open_ids(&self) -> Vec<MuxId> {
        lock(&self.open).keys().copied().collect()
    }

    /// Ids the peer closed, in order.
    pub fn closed_ids(&self) -> Vec<MuxId> {
        lock(&self.closed).clone()
    }
}

impl ChannelFactory for RecordingFactory {
    type Handler = RecordingHandler;

    fn create(&self, _id: MuxId) -> RecordingHandler {
        if self.echo { RecordingHandler::echo() } else { RecordingHandler::new() }
    }

    fn opened(&self, channel: Channel<Recorder>) {
        lock(&self.open).insert(channel.id(), channel.into_connection());
    }

    fn closed(&self, id: MuxId) {
        lock(&self.open).remove(&id);
        lock(&self.closed).push(id);
    }
}

impl fmt::Debug for RecordingFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingFactory")
            .field("echo", &self.echo)
            .field("open", &self.open_ids())
            .field("closed", &self.closed_ids())
            .finish()
    }
}
