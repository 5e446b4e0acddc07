//! The full stack over synchronous delivery.
//!
//! Every send runs the peer's receive path before it returns, so replies
//! arrive from inside the call that provoked them.

use std::sync::Arc;

use tether_core::{
    ChannelInitiatingHandler, ChannelRespondingHandler, EncryptedHandler, Error, TransportConfig,
    TransportError,
};
use tether_harness::{DirectLink, RecordingFactory, RecordingHandler, init_tracing, secure_configs};
use tether_proto::{MuxId, NONCE_SIZE, ProtocolId, TAG_SIZE};

type SecureLink = DirectLink<EncryptedHandler, EncryptedHandler>;

fn secure_link(seed: u64) -> SecureLink {
    init_tracing();
    let (host, enclave) = secure_configs(seed);
    DirectLink::connect(EncryptedHandler::new(host), EncryptedHandler::new(enclave))
}

#[test]
fn handshake_completes_within_initiate() {
    let link = secure_link(31);
    let host_signal = link.host().connection().handshake_signal();
    let enclave_signal = link.enclave().connection().handshake_signal();

    link.host().connection().initiate(ProtocolId::X25519_AES_GCM).unwrap();

    assert!(link.host().connection().is_connected());
    assert!(link.enclave().connection().is_connected());
    assert!(host_signal.is_complete());
    assert!(enclave_signal.is_complete());
}

#[test]
fn encrypted_round_trip() {
    let link = secure_link(32);
    let host = link.host().connection().set_downstream(RecordingHandler::new()).unwrap();
    let enclave = RecordingHandler::echo();
    link.enclave().connection().set_downstream(enclave.clone()).unwrap();
    link.host().connection().initiate(ProtocolId::X25519_AES_GCM).unwrap();

    host.send(b"hello").unwrap();

    assert_eq!(enclave.messages(), vec![b"hello".to_vec()]);
    assert_eq!(host.messages(), vec![b"hello".to_vec()]);
}

#[test]
fn refused_send_leaves_the_channel_usable() {
    init_tracing();
    let (host_config, enclave_config) = secure_configs(33);
    let link = DirectLink::with_config(
        EncryptedHandler::new(host_config),
        EncryptedHandler::new(enclave_config),
        TransportConfig { max_message_size: 128 },
    );
    let host = link.host().connection().set_downstream(RecordingHandler::new()).unwrap();
    let enclave = RecordingHandler::new();
    link.enclave().connection().set_downstream(enclave.clone()).unwrap();
    link.host().connection().initiate(ProtocolId::X25519_AES_GCM).unwrap();

    assert_eq!(
        host.send(&[0; 200]).unwrap_err(),
        Error::Transport(TransportError::MessageTooLarge {
            size: NONCE_SIZE + 200 + TAG_SIZE,
            max: 128,
        })
    );
    host.send(b"small").unwrap();

    assert_eq!(enclave.messages(), vec![b"small".to_vec()]);
    assert!(!link.enclave().is_failed());
}

type NegotiationLink = DirectLink<ChannelInitiatingHandler, ChannelRespondingHandler<RecordingFactory>>;

fn negotiation_link() -> (NegotiationLink, Arc<RecordingFactory>) {
    init_tracing();
    let factory = RecordingFactory::echo();
    let link = DirectLink::connect(
        ChannelInitiatingHandler,
        ChannelRespondingHandler::shared(Arc::clone(&factory)),
    );
    (link, factory)
}

#[test]
fn channel_is_allocated_before_add_downstream_returns() {
    let (link, factory) = negotiation_link();
    let initiator = link.host().connection();

    let mut pending = initiator.add_downstream(RecordingHandler::new()).unwrap();

    assert_eq!(initiator.pending_requests(), 0);
    let channel = pending.try_take().unwrap().unwrap();
    assert_eq!(channel.id(), MuxId::new(0));
    assert_eq!(initiator.mux_ids(), vec![MuxId::new(0)]);
    assert_eq!(factory.open_ids(), vec![MuxId::new(0)]);

    channel.connection().send(b"hi").unwrap();
    assert_eq!(factory.channel(channel.id()).unwrap().messages(), vec![b"hi".to_vec()]);
    assert_eq!(channel.connection().messages(), vec![b"hi".to_vec()]);
}

#[test]
fn stale_traffic_fails_inside_the_send() {
    let (link, factory) = negotiation_link();
    let initiator = link.host().connection();
    let channel = initiator.add_downstream(RecordingHandler::new()).unwrap().wait().unwrap();

    initiator.remove_downstream(channel.id()).unwrap();
    assert_eq!(factory.closed_ids(), vec![channel.id()]);

    assert_eq!(channel.connection().send(b"late").unwrap_err(), Error::UnknownChannel(channel.id()));
    assert!(link.enclave().is_failed());
}

#[test]
fn negotiated_channels_inside_secure_channel() {
    let link = secure_link(34);
    let factory = RecordingFactory::echo();
    let initiator = link.host().connection().set_downstream(ChannelInitiatingHandler).unwrap();
    let responder = link
        .enclave()
        .connection()
        .set_downstream(ChannelRespondingHandler::shared(Arc::clone(&factory)))
        .unwrap();
    link.host().connection().initiate(ProtocolId::X25519_AES_GCM).unwrap();

    let first = initiator.add_downstream(RecordingHandler::new()).unwrap().wait().unwrap();
    let second = initiator.add_downstream(RecordingHandler::new()).unwrap().wait().unwrap();
    assert_eq!(responder.mux_ids(), vec![MuxId::new(0), MuxId::new(1)]);

    second.connection().send(b"to one").unwrap();
    first.connection().send(b"to zero").unwrap();

    assert_eq!(first.connection().messages(), vec![b"to zero".to_vec()]);
    assert_eq!(second.connection().messages(), vec![b"to one".to_vec()]);
}
