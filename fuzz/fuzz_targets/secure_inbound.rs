//! Arbitrary message sequences into the answering side of a secure channel.
//!
//! Input is a series of `[len: u8][message: len]` records. No sequence of
//! forged messages may panic, and only a well-formed handshake request can
//! move the connection out of the handshaking state.

#![no_main]

use std::sync::Arc;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tether_core::{EncryptedHandler, Endpoint, LeafSender, SecureConfig, TransportConfig};
use tether_crypto::Ed25519Signer;
use tether_proto::{HandshakeRequest, ProtocolId};
use tokio::sync::mpsc::unbounded_channel;

fn records(mut data: &[u8]) -> impl Iterator<Item = &[u8]> {
    std::iter::from_fn(move || {
        let (&len, rest) = data.split_first()?;
        let (message, rest) = rest.split_at(usize::from(len).min(rest.len()));
        data = rest;
        Some(message)
    })
}

fuzz_target!(|data: &[u8]| {
    let config = SecureConfig::default().with_signer(Arc::new(Ed25519Signer::from_bytes(&[7; 32])));
    let (tx, mut rx) = unbounded_channel::<Bytes>();
    let endpoint = Endpoint::connect(
        EncryptedHandler::new(config),
        LeafSender::shared(tx, TransportConfig::default()),
        TransportConfig::default(),
    );

    for message in records(data) {
        let was_connected = endpoint.connection().is_connected();
        let accepted = endpoint.deliver(message).is_ok();
        if accepted && !was_connected {
            let request = HandshakeRequest::decode(message);
            assert!(matches!(request, Ok(r) if r.protocol_id == ProtocolId::X25519_AES_GCM));
        }
        while rx.try_recv().is_ok() {}
    }
});
