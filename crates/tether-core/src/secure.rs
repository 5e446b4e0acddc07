//! Secure-channel state machine.
//!
//! An [`EncryptedHandler`] sits over an untrusted hop and turns it into an
//! authenticated, encrypted one. Its downstream handler sees plaintext in
//! both directions.
//!
//! # State Machine
//!
//! ```text
//!                    initiate(protocol)
//!   ┌─────────────────────┐ ─────────────▶ ┌─────────────────────┐
//!   │ HandshakingResponder│                │ HandshakingInitiator│
//!   └─────────────────────┘                └─────────────────────┘
//!        │ handshake request                     │ signed reply
//!        │ (reply with signed key)               │ (verify)
//!        ▼                                       ▼
//!   ┌──────────────────────────────────────────────────┐
//!   │ Connected { decryptor, encryptor }    (terminal) │
//!   └──────────────────────────────────────────────────┘
//! ```
//!
//! # Handshake
//!
//! 1. The initiator sends `[protocol_id: i32][ephemeral public key]`
//! 2. The responder generates its own ephemeral key, derives the shared
//!    secret, and replies with its public key signed by its long-term
//!    identity ([`HandshakeSigner`])
//! 3. The initiator checks the signature ([`HandshakeVerifier`]) and derives
//!    the same secret
//!
//! After that every message in either direction is
//! `[nonce: 4][ciphertext][tag: 16]`.
//!
//! # Concurrency
//!
//! Inbound processing is serialized by a receive lock held for the whole
//! receive path, so a handshake transition and its reply are atomic with
//! respect to other inbound messages. The state itself is behind a separate
//! short-lived lock so outbound sends from other threads only wait for a
//! state read, never for a delivery.
//!
//! A handshake message only leaves once the state already expects the
//! answer, and never with the state lock held. `initiate` holds neither lock
//! while sending. A transport that delivers to the peer synchronously, and
//! gets the peer's answer delivered back before `send` returns, works the
//! same as a queued one.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak},
};

use bytes::{BufMut, BytesMut};
use tether_crypto::{
    HandshakeSigner, HandshakeVerifier, KeyAgreement, MessageDecryptor, MessageEncryptor,
    ProtocolRegistry, ProtocolSuite, SharedSecret,
};
use tether_proto::{HandshakeRequest, ProtocolId};
use tracing::{debug, trace, warn};

use crate::{
    env::{Entropy, SystemEntropy},
    error::{Error, Result, UsageError},
    signal::{HandshakeNotifier, HandshakeSignal, handshake_signal},
    transport::{Handler, Inbound, Sender, Writer, assemble, bind},
};

/// Secure-channel configuration.
#[derive(Clone)]
pub struct SecureConfig {
    /// Supported protocol suites
    pub registry: ProtocolRegistry,
    /// Randomness for ephemeral keys and nonce seeds
    pub entropy: Arc<dyn Entropy>,
    /// Signs this side's ephemeral key when answering a handshake
    pub signer: Option<Arc<dyn HandshakeSigner>>,
    /// Verifies the peer's ephemeral key when opening a handshake
    pub verifier: Option<Arc<dyn HandshakeVerifier>>,
}

impl SecureConfig {
    /// Default suites, `entropy`, and no identity hooks.
    pub fn new(entropy: Arc<dyn Entropy>) -> Self {
        Self { registry: ProtocolRegistry::default(), entropy, signer: None, verifier: None }
    }

    /// Answer handshakes signing with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn HandshakeSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Open handshakes verifying with `verifier`.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn HandshakeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Replace the suite table.
    #[must_use]
    pub fn with_registry(mut self, registry: ProtocolRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self::new(Arc::new(SystemEntropy))
    }
}

impl fmt::Debug for SecureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConfig")
            .field("protocols", &self.registry.ids())
            .field("signer", &self.signer.is_some())
            .field("verifier", &self.verifier.is_some())
            .finish_non_exhaustive()
    }
}

/// Handler adding a secure channel over its upstream.
///
/// Every connection starts as a responder. Call
/// [`EncryptedConnection::initiate`] on the side that opens the handshake.
#[derive(Debug, Clone)]
pub struct EncryptedHandler {
    config: Arc<SecureConfig>,
}

impl EncryptedHandler {
    /// Handler using `config` for every connection it creates.
    pub fn new(config: SecureConfig) -> Self {
        Self { config: Arc::new(config) }
    }
}

impl Handler for EncryptedHandler {
    type Connection = EncryptedConnection;

    fn connect(&self, upstream: Arc<dyn Sender>) -> EncryptedConnection {
        EncryptedConnection::new(upstream, Arc::clone(&self.config))
    }

    fn on_receive(&self, connection: &EncryptedConnection, message: &[u8]) -> Result<()> {
        connection.on_receive(message)
    }
}

type SharedEncryptor = Arc<Mutex<Box<dyn MessageEncryptor>>>;

enum State {
    HandshakingResponder,
    HandshakingInitiator {
        protocol_id: ProtocolId,
        key_agreement: Box<dyn KeyAgreement>,
    },
    Connected {
        protocol_id: ProtocolId,
        decryptor: Arc<dyn MessageDecryptor>,
        encryptor: SharedEncryptor,
    },
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::HandshakingResponder => "handshaking-responder",
            Self::HandshakingInitiator { .. } => "handshaking-initiator",
            Self::Connected { .. } => "connected",
        }
    }
}

/// Name reported for a connection whose handshake failed part way.
const FAILED: &str = "failed";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One end of a secure channel.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EncryptedConnection {
    inner: Arc<SecureInner>,
}

struct SecureInner {
    upstream: Arc<dyn Sender>,
    config: Arc<SecureConfig>,
    receive_lock: Mutex<()>,
    /// `None` once a handshake failed after consuming its key agreement
    state: Mutex<Option<State>>,
    downstream: OnceLock<Arc<dyn Inbound>>,
    notifier: HandshakeNotifier,
    signal: HandshakeSignal,
}

impl EncryptedConnection {
    /// Responder-state connection over `upstream`.
    pub fn new(upstream: Arc<dyn Sender>, config: Arc<SecureConfig>) -> Self {
        let (notifier, signal) = handshake_signal();
        Self {
            inner: Arc::new(SecureInner {
                upstream,
                config,
                receive_lock: Mutex::new(()),
                state: Mutex::new(Some(State::HandshakingResponder)),
                downstream: OnceLock::new(),
                notifier,
                signal,
            }),
        }
    }

    /// Current state name, for logs and assertions.
    pub fn state_name(&self) -> &'static str {
        lock(&self.inner.state).as_ref().map_or(FAILED, State::name)
    }

    /// True once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(*lock(&self.inner.state), Some(State::Connected { .. }))
    }

    /// Negotiated protocol, once connected.
    pub fn protocol_id(&self) -> Option<ProtocolId> {
        match &*lock(&self.inner.state) {
            Some(State::Connected { protocol_id, .. }) => Some(*protocol_id),
            _ => None,
        }
    }

    /// Signal satisfied when the handshake completes.
    pub fn handshake_signal(&self) -> HandshakeSignal {
        self.inner.signal.clone()
    }

    /// Register the handler that receives decrypted messages.
    ///
    /// Its upstream encrypts. Only one downstream handler may be registered.
    pub fn set_downstream<H: Handler>(&self, handler: H) -> Result<H::Connection> {
        if self.inner.downstream.get().is_some() {
            return Err(UsageError::DownstreamAlreadySet.into());
        }

        let sender = Arc::new(EncryptingSender { connection: Arc::downgrade(&self.inner) });
        let (inbound, connection) = bind(handler, sender);
        self.inner
            .downstream
            .set(inbound)
            .map_err(|_| Error::from(UsageError::DownstreamAlreadySet))?;
        Ok(connection)
    }

    /// Open the handshake with `protocol_id`.
    ///
    /// Only valid before any handshake message has been processed. The
    /// connection is already waiting for the reply when the request leaves,
    /// so a transport may deliver that reply from inside this call.
    pub fn initiate(&self, protocol_id: ProtocolId) -> Result<()> {
        let inner = &self.inner;
        let request = {
            let _receiving = lock(&inner.receive_lock);
            let mut state = lock(&inner.state);

            match state.as_ref() {
                Some(State::HandshakingResponder) => {},
                other => {
                    return Err(UsageError::InvalidState {
                        state: other.map_or(FAILED, State::name),
                        operation: "initiate",
                    }
                    .into());
                },
            }
            if inner.config.verifier.is_none() {
                return Err(UsageError::MissingVerifier.into());
            }
            let suite = inner
                .config
                .registry
                .get(protocol_id)
                .ok_or(UsageError::UnsupportedProtocol(protocol_id))?;

            let key_agreement = self.key_agreement(suite)?;
            let request =
                HandshakeRequest { protocol_id, public_key: key_agreement.public_key() }.to_vec();
            *state = Some(State::HandshakingInitiator { protocol_id, key_agreement });
            debug!(%protocol_id, suite = suite.name, "handshake initiated");
            request
        };

        if let Err(err) = inner.upstream.send_message(&request) {
            let mut state = lock(&inner.state);
            if matches!(*state, Some(State::HandshakingInitiator { .. })) {
                *state = Some(State::HandshakingResponder);
            }
            warn!(error = %err, "handshake request not sent");
            return Err(err);
        }
        Ok(())
    }

    /// Process one inbound message.
    pub fn on_receive(&self, message: &[u8]) -> Result<()> {
        let inner = &self.inner;
        let _receiving = lock(&inner.receive_lock);
        let mut state = lock(&inner.state);

        match state.take() {
            Some(State::Connected { protocol_id, decryptor, encryptor }) => {
                let opener = Arc::clone(&decryptor);
                *state = Some(State::Connected { protocol_id, decryptor, encryptor });
                drop(state);
                self.deliver(opener.as_ref(), message)
            },
            Some(State::HandshakingResponder) => {
                let (connected, reply) = match self.respond(message) {
                    Ok(answer) => answer,
                    Err(err) => {
                        *state = Some(State::HandshakingResponder);
                        warn!(error = %err, "handshake request rejected");
                        return Err(err);
                    },
                };
                // Connected before the reply leaves: the peer may start
                // sending traffic from inside this send.
                *state = Some(connected);
                drop(state);

                if let Err(err) = inner.upstream.send_message(&reply) {
                    *lock(&inner.state) = Some(State::HandshakingResponder);
                    warn!(error = %err, "handshake reply not sent");
                    return Err(err);
                }
                inner.notifier.complete();
                debug!("handshake answered, connected");
                Ok(())
            },
            Some(State::HandshakingInitiator { protocol_id, key_agreement }) => {
                match self.complete(protocol_id, key_agreement, message) {
                    Ok(connected) => {
                        *state = Some(connected);
                        drop(state);
                        inner.notifier.complete();
                        debug!(%protocol_id, "handshake verified, connected");
                        Ok(())
                    },
                    Err(err) => {
                        warn!(error = %err, "handshake reply rejected");
                        Err(err)
                    },
                }
            },
            None => Err(Error::UnexpectedMessage { state: FAILED }),
        }
    }

    fn key_agreement(&self, suite: &ProtocolSuite) -> Result<Box<dyn KeyAgreement>> {
        let seed = zeroize::Zeroizing::new(
            self.inner.config.entropy.random_vec(suite.key_agreement_seed_len),
        );
        Ok((suite.key_agreement)(&seed)?)
    }

    fn connected(
        &self,
        protocol_id: ProtocolId,
        suite: &ProtocolSuite,
        secret: &SharedSecret,
    ) -> Result<State> {
        let nonce_seed = self.inner.config.entropy.random_u32();
        let encryptor = (suite.encryptor)(secret, nonce_seed)?;
        let decryptor = (suite.decryptor)(secret)?;
        Ok(State::Connected {
            protocol_id,
            decryptor: Arc::from(decryptor),
            encryptor: Arc::new(Mutex::new(encryptor)),
        })
    }

    /// Answer a handshake request: the connected state and the signed reply
    /// to send.
    fn respond(&self, message: &[u8]) -> Result<(State, Vec<u8>)> {
        let config = &self.inner.config;
        let request = HandshakeRequest::decode(message)?;
        let protocol_id = request.protocol_id;
        let suite = config.registry.get(protocol_id).ok_or(Error::UnknownProtocol(protocol_id))?;
        let signer = config.signer.as_ref().ok_or(UsageError::MissingSigner)?;

        let key_agreement = self.key_agreement(suite)?;
        let signed = signer.sign(key_agreement.public_key())?;
        let secret = key_agreement.compute_shared_secret(request.public_key)?;
        let connected = self.connected(protocol_id, suite, &secret)?;
        debug!(%protocol_id, suite = suite.name, "handshake request accepted");
        Ok((connected, signed))
    }

    /// Finish a handshake this side opened.
    fn complete(
        &self,
        protocol_id: ProtocolId,
        key_agreement: Box<dyn KeyAgreement>,
        message: &[u8],
    ) -> Result<State> {
        let config = &self.inner.config;
        let verifier = config.verifier.as_ref().ok_or(UsageError::MissingVerifier)?;
        let suite = config.registry.get(protocol_id).ok_or(Error::UnknownProtocol(protocol_id))?;

        let peer_public_key = verifier.verify(message)?;
        let secret = key_agreement.compute_shared_secret(peer_public_key)?;
        self.connected(protocol_id, suite, &secret)
    }

    fn deliver(&self, decryptor: &dyn MessageDecryptor, message: &[u8]) -> Result<()> {
        let plaintext = decryptor.open(message)?;
        let downstream = self.inner.downstream.get().ok_or(UsageError::NoDownstream)?;
        trace!(length = plaintext.len(), "decrypted");
        downstream.on_receive(&plaintext)
    }
}

impl fmt::Debug for EncryptedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedConnection")
            .field("state", &self.state_name())
            .field("downstream", &self.inner.downstream.get().is_some())
            .finish_non_exhaustive()
    }
}

/// Upstream of the downstream handler: encrypts, then forwards.
///
/// Holds the connection weakly; the connection owns the downstream handler,
/// which owns this sender.
struct EncryptingSender {
    connection: Weak<SecureInner>,
}

impl Sender for EncryptingSender {
    fn send(&self, length: usize, writers: Vec<Writer<'_>>) -> Result<()> {
        let inner = self.connection.upgrade().ok_or(Error::Abandoned("secure channel"))?;
        let encryptor = match &*lock(&inner.state) {
            Some(State::Connected { encryptor, .. }) => Arc::clone(encryptor),
            _ => return Err(UsageError::NotConnected.into()),
        };

        let plaintext = assemble(length, writers)?;
        let sealed_len = lock(&encryptor).sealed_len(length);
        // Sealing runs inside the upstream send, after its size checks, so a
        // refused message consumes no nonce.
        let seal: Writer<'_> = Box::new(move |out: &mut BytesMut| {
            let sealed = lock(&encryptor).seal(&plaintext)?;
            out.put_slice(&sealed);
            Ok(())
        });
        trace!(length, sealed_len, "encrypting");
        inner.upstream.send(sealed_len, vec![seal])
    }
}
