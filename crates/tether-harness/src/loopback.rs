//! In-process links between two handler trees.
//!
//! [`Link`]: each side's leaf sender pushes into an unbounded queue; nothing
//! is delivered until the test pumps the link. Delivery never happens inside
//! a `send` call.
//!
//! [`DirectLink`]: each `send` hands the message straight to the peer's
//! endpoint and returns its result, the way a synchronous call boundary
//! does. Replies are delivered from inside the send that caused them.
//!
//! # Fault injection
//!
//! An interceptor sees every message before delivery and may pass it,
//! rewrite it, or drop it:
//!
//! ```ignore
//! link.intercept(|to, message| match to {
//!     Side::Enclave => Some(tamper(message)),
//!     Side::Host => Some(message),
//! });
//! ```

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak},
};

use bytes::Bytes;
use tether_core::{
    Endpoint, Handler, LeafSender, Sender, TransportConfig, TransportError, Writer, assemble,
};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::trace;

/// One end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Untrusted host side
    Host,
    /// Trusted enclave side
    Enclave,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Enclave => f.write_str("enclave"),
        }
    }
}

/// Delivery into one side of a link failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to {side} failed: {source}")]
pub struct LinkError {
    /// Side whose handler tree rejected the message
    pub side: Side,
    /// Error returned by the endpoint
    #[source]
    pub source: tether_core::Error,
}

/// Sees each message before delivery to the given side. Return `None` to drop it.
pub type Interceptor = Box<dyn FnMut(Side, Bytes) -> Option<Bytes> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Two connected handler trees and the queues between them.
pub struct Link<H: Handler, E: Handler> {
    host: Endpoint<H>,
    enclave: Endpoint<E>,
    to_host: Mutex<UnboundedReceiver<Bytes>>,
    to_enclave: Mutex<UnboundedReceiver<Bytes>>,
    interceptor: Mutex<Option<Interceptor>>,
}

impl<H: Handler, E: Handler> Link<H, E> {
    /// Connect `host` and `enclave` with default limits.
    pub fn connect(host: H, enclave: E) -> Self {
        Self::with_config(host, enclave, TransportConfig::default())
    }

    /// Connect `host` and `enclave` with `config` on both sides.
    pub fn with_config(host: H, enclave: E, config: TransportConfig) -> Self {
        let (host_tx, to_enclave) = unbounded_channel();
        let (enclave_tx, to_host) = unbounded_channel();

        Self {
            host: Endpoint::connect(host, LeafSender::shared(host_tx, config), config),
            enclave: Endpoint::connect(enclave, LeafSender::shared(enclave_tx, config), config),
            to_host: Mutex::new(to_host),
            to_enclave: Mutex::new(to_enclave),
            interceptor: Mutex::new(None),
        }
    }

    /// Host endpoint.
    pub fn host(&self) -> &Endpoint<H> {
        &self.host
    }

    /// Enclave endpoint.
    pub fn enclave(&self) -> &Endpoint<E> {
        &self.enclave
    }

    /// Route every message through `interceptor` before delivery.
    pub fn intercept(&self, interceptor: impl FnMut(Side, Bytes) -> Option<Bytes> + Send + 'static) {
        *lock(&self.interceptor) = Some(Box::new(interceptor));
    }

    /// Deliver messages unmodified again.
    pub fn clear_interceptor(&self) {
        *lock(&self.interceptor) = None;
    }

    /// Take the next queued message for `to` and deliver it.
    ///
    /// Returns `Ok(false)` if nothing was queued. A message dropped by the
    /// interceptor still counts as taken.
    pub fn step(&self, to: Side) -> Result<bool, LinkError> {
        let queue = match to {
            Side::Host => &self.to_host,
            Side::Enclave => &self.to_enclave,
        };
        let Ok(message) = lock(queue).try_recv() else {
            return Ok(false);
        };

        let message = match lock(&self.interceptor).as_mut() {
            Some(interceptor) => interceptor(to, message),
            None => Some(message),
        };
        let Some(message) = message else {
            trace!(%to, "dropped");
            return Ok(true);
        };

        trace!(%to, length = message.len(), "deliver");
        let delivered = match to {
            Side::Host => self.host.deliver(&message),
            Side::Enclave => self.enclave.deliver(&message),
        };
        delivered.map(|()| true).map_err(|source| LinkError { side: to, source })
    }

    /// Deliver until both queues are empty, alternating sides.
    ///
    /// Returns the number of messages taken from the queues.
    pub fn pump(&self) -> Result<usize, LinkError> {
        let mut taken = 0;
        loop {
            let mut progressed = false;
            for side in [Side::Enclave, Side::Host] {
                if self.step(side)? {
                    taken += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(taken);
            }
        }
    }
}

impl<H: Handler, E: Handler> fmt::Debug for Link<H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("host", &self.host)
            .field("enclave", &self.enclave)
            .finish_non_exhaustive()
    }
}

/// Captures raw messages sent by a handler tree.
#[derive(Debug)]
pub struct Wiretap {
    rx: Mutex<UnboundedReceiver<Bytes>>,
}

impl Wiretap {
    /// Leaf sender feeding a new wiretap.
    pub fn attach() -> (Arc<dyn Sender>, Self) {
        let (tx, rx) = unbounded_channel();
        (LeafSender::shared(tx, TransportConfig::default()), Self { rx: Mutex::new(rx) })
    }

    /// Every message captured since the last drain, in send order.
    pub fn drain(&self) -> Vec<Bytes> {
        let mut rx = lock(&self.rx);
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Anything that accepts inbound messages for one handler tree.
trait Deliver: Send + Sync {
    fn deliver(&self, message: &[u8]) -> tether_core::Result<()>;
}

impl<H: Handler> Deliver for Endpoint<H> {
    fn deliver(&self, message: &[u8]) -> tether_core::Result<()> {
        Endpoint::deliver(self, message)
    }
}

/// Sender delivering into the peer endpoint before returning.
///
/// The peer is held weakly; endpoints own their senders.
struct DirectSender {
    peer: OnceLock<Weak<dyn Deliver>>,
    config: TransportConfig,
}

impl DirectSender {
    fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self { peer: OnceLock::new(), config })
    }

    fn attach<H: Handler>(&self, peer: &Arc<Endpoint<H>>) {
        let peer: Arc<dyn Deliver> = Arc::<Endpoint<H>>::clone(peer);
        let _ = self.peer.set(Arc::downgrade(&peer));
    }
}

impl Sender for DirectSender {
    fn send(&self, length: usize, writers: Vec<Writer<'_>>) -> tether_core::Result<()> {
        if length > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: length,
                max: self.config.max_message_size,
            }
            .into());
        }

        let message = assemble(length, writers)?;
        let peer = self
            .peer
            .get()
            .and_then(Weak::upgrade)
            .ok_or(tether_core::Error::Abandoned("direct link"))?;
        trace!(length, "deliver direct");
        peer.deliver(&message)
    }
}

impl fmt::Debug for DirectSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSender").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Two handler trees calling into each other synchronously.
///
/// A send returns the error of the peer's delivery, if any; the failing
/// endpoint is poisoned as usual.
pub struct DirectLink<H: Handler, E: Handler> {
    host: Arc<Endpoint<H>>,
    enclave: Arc<Endpoint<E>>,
}

impl<H: Handler, E: Handler> DirectLink<H, E> {
    /// Connect `host` and `enclave` with default limits.
    pub fn connect(host: H, enclave: E) -> Self {
        Self::with_config(host, enclave, TransportConfig::default())
    }

    /// Connect `host` and `enclave` with `config` on both sides.
    pub fn with_config(host: H, enclave: E, config: TransportConfig) -> Self {
        let to_enclave = DirectSender::new(config);
        let to_host = DirectSender::new(config);
        let host = Arc::new(Endpoint::connect(host, to_enclave.clone(), config));
        let enclave = Arc::new(Endpoint::connect(enclave, to_host.clone(), config));
        to_enclave.attach(&enclave);
        to_host.attach(&host);
        Self { host, enclave }
    }

    /// Host endpoint.
    pub fn host(&self) -> &Endpoint<H> {
        &self.host
    }

    /// Enclave endpoint.
    pub fn enclave(&self) -> &Endpoint<E> {
        &self.enclave
    }
}

impl<H: Handler, E: Handler> fmt::Debug for DirectLink<H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectLink")
            .field("host", &self.host)
            .field("enclave", &self.enclave)
            .finish()
    }
}
