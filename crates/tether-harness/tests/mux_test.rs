//! Static multiplexing across a link.

use std::thread;

use proptest::prelude::*;
use tether_core::{Error, MuxingHandler, TransportConfig, TransportError};
use tether_harness::{Link, Recorder, RecordingHandler, init_tracing};
use tether_proto::{MuxId, ProtocolError};

type MuxLink = Link<MuxingHandler, MuxingHandler>;

/// `channels` recorders registered under ids 0.. on both sides.
fn mux_link(channels: usize) -> (MuxLink, Vec<Recorder>, Vec<RecordingHandler>) {
    init_tracing();
    let link = Link::connect(MuxingHandler, MuxingHandler);
    let mut host = Vec::new();
    let mut enclave = Vec::new();
    for id in 0..channels {
        let id = MuxId::new(i32::try_from(id).unwrap());
        host.push(link.host().connection().add_downstream(id, RecordingHandler::new()).unwrap());
        let handler = RecordingHandler::new();
        link.enclave().connection().add_downstream(id, handler.clone()).unwrap();
        enclave.push(handler);
    }
    (link, host, enclave)
}

#[test]
fn unregistered_id_fails_the_connection() {
    let (link, _, enclave) = mux_link(1);

    let err = link.enclave().deliver(&[0, 0, 0, 3, b'x']).unwrap_err();
    assert_eq!(err, Error::UnknownChannel(MuxId::new(3)));
    assert!(link.enclave().is_failed());

    // Poisoned: even well-addressed traffic is refused from now on.
    let err = link.enclave().deliver(&[0, 0, 0, 0, b'y']).unwrap_err();
    assert!(matches!(err, Error::ConnectionFailed(_)));
    assert!(enclave[0].messages().is_empty());
}

#[test]
fn short_message_is_a_protocol_error() {
    let (link, _, _) = mux_link(1);
    assert!(matches!(
        link.enclave().deliver(&[0, 0]).unwrap_err(),
        Error::Protocol(ProtocolError::Truncated { .. })
    ));
}

#[test]
fn control_id_is_never_delivered() {
    let (link, _, _) = mux_link(1);
    let err = link.enclave().deliver(&[0xff, 0xff, 0xff, 0xff, 0]).unwrap_err();
    assert_eq!(err, Error::UnknownChannel(MuxId::CONTROL));
}

#[test]
fn oversized_message_is_refused_before_sending() {
    init_tracing();
    let config = TransportConfig { max_message_size: 16 };
    let link = Link::with_config(MuxingHandler, MuxingHandler, config);
    let host = link.host().connection().add_downstream(MuxId::new(0), RecordingHandler::new()).unwrap();

    let err = host.send(&[0; 13]).unwrap_err();

    assert_eq!(err, Error::Transport(TransportError::MessageTooLarge { size: 17, max: 16 }));
    assert_eq!(link.pump().unwrap(), 0);
}

#[test]
fn nested_multiplexers_stack_headers() {
    init_tracing();
    let link = Link::connect(MuxingHandler, MuxingHandler);
    let host_outer = link.host().connection().add_downstream(MuxId::new(5), MuxingHandler).unwrap();
    let host_inner = host_outer.add_downstream(MuxId::new(6), RecordingHandler::new()).unwrap();
    let enclave_outer =
        link.enclave().connection().add_downstream(MuxId::new(5), MuxingHandler).unwrap();
    let enclave_inner = RecordingHandler::echo();
    enclave_outer.add_downstream(MuxId::new(6), enclave_inner.clone()).unwrap();

    host_inner.send(b"deep").unwrap();
    link.pump().unwrap();

    assert_eq!(enclave_inner.messages(), vec![b"deep".to_vec()]);
    assert_eq!(host_inner.messages(), vec![b"deep".to_vec()]);
}

#[test]
fn concurrent_channels_keep_their_order() {
    let (link, host, enclave) = mux_link(4);

    let senders: Vec<_> = host
        .into_iter()
        .map(|recorder| {
            thread::spawn(move || {
                for n in 0..50u8 {
                    recorder.send(&[n]).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }
    assert_eq!(link.pump().unwrap(), 200);

    let expected: Vec<Vec<u8>> = (0..50u8).map(|n| vec![n]).collect();
    for handler in enclave {
        assert_eq!(handler.messages(), expected);
    }
}

fn traffic() -> impl Strategy<Value = (usize, Vec<(usize, Vec<u8>)>)> {
    (1usize..6).prop_flat_map(|channels| {
        let message = (0..channels, prop::collection::vec(any::<u8>(), 0..32));
        (Just(channels), prop::collection::vec(message, 0..64))
    })
}

proptest! {
    #[test]
    fn interleaved_traffic_reaches_the_right_channel_in_order((channels, sends) in traffic()) {
        let (link, host, enclave) = mux_link(channels);

        for (channel, payload) in &sends {
            host[*channel].send(payload).unwrap();
        }
        prop_assert_eq!(link.pump().unwrap(), sends.len());

        for (channel, handler) in enclave.iter().enumerate() {
            let expected: Vec<Vec<u8>> = sends
                .iter()
                .filter(|(to, _)| *to == channel)
                .map(|(_, payload)| payload.clone())
                .collect();
            prop_assert_eq!(handler.messages(), expected);
        }
        prop_assert!(!link.enclave().is_failed());
    }

    #[test]
    fn any_unregistered_id_fails(id in any::<i32>().prop_filter("registered", |id| !(0..3).contains(id))) {
        let (link, _, _) = mux_link(3);

        let mut message = id.to_be_bytes().to_vec();
        message.push(0);
        let err = link.enclave().deliver(&message).unwrap_err();

        prop_assert_eq!(err, Error::UnknownChannel(MuxId::new(id)));
    }
}
