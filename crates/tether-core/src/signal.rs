//! One-shot completion signals.
//!
//! Two things in a handler tree complete later than the call that started
//! them: a secure-channel handshake and a dynamically negotiated channel.
//! Both are exposed as one-shot values that can be awaited from async code or
//! waited on from a plain thread. Neither polls.
//!
//! The primitives come from `tokio::sync` and need no runtime: blocking
//! waits drive them with a minimal executor. Do not call the blocking waits
//! from inside an async task; the completing message would never be
//! delivered.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tether_proto::{MuxId, RequestId};
use tokio::sync::{oneshot, watch};

use crate::{
    channel::Channel,
    error::{Error, Result},
};

/// Completing half of a [`HandshakeSignal`].
#[derive(Debug)]
pub(crate) struct HandshakeNotifier {
    tx: watch::Sender<bool>,
}

impl HandshakeNotifier {
    /// Mark the handshake complete. Later calls have no further effect.
    pub(crate) fn complete(&self) {
        self.tx.send_if_modified(|done| !std::mem::replace(done, true));
    }
}

/// Satisfied once, when a secure channel first becomes connected.
#[derive(Debug, Clone)]
pub struct HandshakeSignal {
    rx: watch::Receiver<bool>,
}

/// New handshake signal with its completing half.
pub(crate) fn handshake_signal() -> (HandshakeNotifier, HandshakeSignal) {
    let (tx, rx) = watch::channel(false);
    (HandshakeNotifier { tx }, HandshakeSignal { rx })
}

impl HandshakeSignal {
    /// True once the handshake has completed.
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the handshake to complete.
    ///
    /// Fails with [`Error::Abandoned`] if the connection is dropped first.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        rx.wait_for(|done| *done).await.map(|_| ()).map_err(|_| Error::Abandoned("handshake"))
    }

    /// Block the current thread until the handshake completes.
    pub fn wait_blocking(&self) -> Result<()> {
        futures::executor::block_on(self.wait())
    }
}

/// Resolves to a [`Channel`] once the peer has allocated it.
///
/// Await it, or call [`PendingChannel::wait`] from a blocking thread.
/// Dropping it does not cancel the request: the channel is still registered
/// when the allocation arrives.
#[derive(Debug)]
pub struct PendingChannel<C> {
    request_id: RequestId,
    rx: oneshot::Receiver<(MuxId, C)>,
}

/// Resolving half of a [`PendingChannel`].
pub(crate) type ChannelResolver<C> = oneshot::Sender<(MuxId, C)>;

/// New pending channel for `request_id` with its resolving half.
pub(crate) fn pending_channel<C>(request_id: RequestId) -> (ChannelResolver<C>, PendingChannel<C>) {
    let (tx, rx) = oneshot::channel();
    (tx, PendingChannel { request_id, rx })
}

impl<C> PendingChannel<C> {
    /// Request id carried by the Open message.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Channel, if it has been allocated already.
    ///
    /// Returns `None` while the request is outstanding.
    pub fn try_take(&mut self) -> Option<Result<Channel<C>>> {
        match self.rx.try_recv() {
            Ok((id, connection)) => Some(Ok(Channel::new(id, connection))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::Abandoned("channel open"))),
        }
    }

    /// Block the current thread until the channel is allocated.
    pub fn wait(self) -> Result<Channel<C>> {
        futures::executor::block_on(self)
    }
}

impl<C> Future for PendingChannel<C> {
    type Output = Result<Channel<C>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|resolved| {
            resolved
                .map(|(id, connection)| Channel::new(id, connection))
                .map_err(|_| Error::Abandoned("channel open"))
        })
    }
}
