//! Layers composed: negotiated channels and static multiplexing inside a
//! secure channel.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tether_core::{
    ChannelInitiatingHandler, ChannelInitiator, ChannelRespondingHandler, ChannelResponder,
    EncryptedHandler, Error, MuxConnection, MuxingHandler,
};
use tether_harness::{Link, RecordingFactory, RecordingHandler, Side, init_tracing, secure_configs};
use tether_proto::{MuxId, ProtocolId};

type SecureLink = Link<EncryptedHandler, EncryptedHandler>;

fn secure_link(seed: u64) -> SecureLink {
    init_tracing();
    let (host, enclave) = secure_configs(seed);
    Link::connect(EncryptedHandler::new(host), EncryptedHandler::new(enclave))
}

fn handshake(link: &SecureLink) {
    link.host().connection().initiate(ProtocolId::X25519_AES_GCM).unwrap();
    link.pump().unwrap();
    assert!(link.host().connection().is_connected());
    assert!(link.enclave().connection().is_connected());
}

fn record_wire(link: &SecureLink) -> Arc<Mutex<Vec<Bytes>>> {
    let wire = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&wire);
    link.intercept(move |_, message| {
        log.lock().unwrap().push(message.clone());
        Some(message)
    });
    wire
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

struct Negotiated {
    link: SecureLink,
    initiator: ChannelInitiator,
    responder: ChannelResponder<RecordingFactory>,
    factory: Arc<RecordingFactory>,
}

fn negotiated(seed: u64) -> Negotiated {
    let link = secure_link(seed);
    let factory = RecordingFactory::echo();
    let initiator = link.host().connection().set_downstream(ChannelInitiatingHandler).unwrap();
    let responder = link
        .enclave()
        .connection()
        .set_downstream(ChannelRespondingHandler::shared(Arc::clone(&factory)))
        .unwrap();
    handshake(&link);
    Negotiated { link, initiator, responder, factory }
}

#[test]
fn negotiated_channels_inside_secure_channel() {
    let stack = negotiated(21);
    let wire = record_wire(&stack.link);

    let pending = stack.initiator.add_downstream(RecordingHandler::new()).unwrap();
    stack.link.pump().unwrap();
    let channel = pending.wait().unwrap();
    assert_eq!(channel.id(), MuxId::new(0));
    assert_eq!(stack.responder.mux_ids(), vec![MuxId::new(0)]);

    channel.connection().send(b"attested secret").unwrap();
    stack.link.pump().unwrap();

    assert_eq!(
        stack.factory.channel(channel.id()).unwrap().messages(),
        vec![b"attested secret".to_vec()]
    );
    assert_eq!(channel.connection().messages(), vec![b"attested secret".to_vec()]);
    assert!(wire.lock().unwrap().iter().all(|message| !contains(message, b"attested secret")));
}

#[test]
fn close_and_reopen_inside_secure_channel() {
    let stack = negotiated(22);

    let first = stack.initiator.add_downstream(RecordingHandler::new()).unwrap();
    stack.link.pump().unwrap();
    let first = first.wait().unwrap();

    stack.initiator.remove_downstream(first.id()).unwrap();
    let second = stack.initiator.add_downstream(RecordingHandler::new()).unwrap();
    stack.link.pump().unwrap();
    let second = second.wait().unwrap();

    assert_eq!(stack.factory.closed_ids(), vec![MuxId::new(0)]);
    assert_eq!(stack.factory.open_ids(), vec![MuxId::new(1)]);
    assert_eq!(second.id(), MuxId::new(1));

    first.connection().send(b"stale").unwrap();
    let err = stack.link.pump().unwrap_err();
    assert_eq!(err.side, Side::Enclave);
    assert_eq!(err.source, Error::UnknownChannel(first.id()));
}

#[test]
fn negotiation_before_handshake_is_refused() {
    let link = secure_link(23);
    let initiator = link.host().connection().set_downstream(ChannelInitiatingHandler).unwrap();

    assert!(initiator.add_downstream(RecordingHandler::new()).is_err());
    assert_eq!(initiator.pending_requests(), 0);
}

#[test]
fn static_mux_inside_secure_channel() {
    let link = secure_link(24);
    let host: MuxConnection = link.host().connection().set_downstream(MuxingHandler).unwrap();
    let enclave: MuxConnection = link.enclave().connection().set_downstream(MuxingHandler).unwrap();

    let control = host.add_downstream(MuxId::new(0), RecordingHandler::new()).unwrap();
    let data = host.add_downstream(MuxId::new(1), RecordingHandler::new()).unwrap();
    let enclave_control = RecordingHandler::echo();
    let enclave_data = RecordingHandler::new();
    enclave.add_downstream(MuxId::new(0), enclave_control.clone()).unwrap();
    enclave.add_downstream(MuxId::new(1), enclave_data.clone()).unwrap();
    handshake(&link);

    control.send(b"status?").unwrap();
    data.send(b"block 1").unwrap();
    data.send(b"block 2").unwrap();
    link.pump().unwrap();

    assert_eq!(enclave_control.messages(), vec![b"status?".to_vec()]);
    assert_eq!(enclave_data.messages(), vec![b"block 1".to_vec(), b"block 2".to_vec()]);
    assert_eq!(control.messages(), vec![b"status?".to_vec()]);
    assert!(data.messages().is_empty());
}

#[test]
fn secure_channel_per_mux_channel() {
    init_tracing();
    let link = Link::connect(MuxingHandler, MuxingHandler);
    let (host_config, enclave_config) = secure_configs(25);

    let host_secure = link
        .host()
        .connection()
        .add_downstream(MuxId::new(9), EncryptedHandler::new(host_config))
        .unwrap();
    let enclave_secure = link
        .enclave()
        .connection()
        .add_downstream(MuxId::new(9), EncryptedHandler::new(enclave_config))
        .unwrap();
    let host_app = host_secure.set_downstream(RecordingHandler::new()).unwrap();
    let enclave_app = RecordingHandler::echo();
    enclave_secure.set_downstream(enclave_app.clone()).unwrap();

    host_secure.initiate(ProtocolId::X25519_AES_GCM).unwrap();
    link.pump().unwrap();
    assert!(host_secure.is_connected());
    assert!(enclave_secure.is_connected());

    host_app.send(b"nested").unwrap();
    link.pump().unwrap();
    assert_eq!(enclave_app.messages(), vec![b"nested".to_vec()]);
    assert_eq!(host_app.messages(), vec![b"nested".to_vec()]);
}
