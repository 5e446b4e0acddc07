//! Arbitrary message sequences into a channel responder.
//!
//! Input is a series of `[len: u8][message: len]` records. The responder may
//! fail the connection but must never panic, and once failed it must stay
//! failed.

#![no_main]

use std::sync::Arc;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tether_core::{
    ChannelFactory, ChannelRespondingHandler, Endpoint, LeafSender, MuxingHandler,
    TransportConfig,
};
use tether_proto::MuxId;
use tokio::sync::mpsc::unbounded_channel;

struct NestedMuxFactory;

impl ChannelFactory for NestedMuxFactory {
    type Handler = MuxingHandler;

    fn create(&self, _id: MuxId) -> MuxingHandler {
        MuxingHandler
    }
}

fn records(mut data: &[u8]) -> impl Iterator<Item = &[u8]> {
    std::iter::from_fn(move || {
        let (&len, rest) = data.split_first()?;
        let (message, rest) = rest.split_at(usize::from(len).min(rest.len()));
        data = rest;
        Some(message)
    })
}

fuzz_target!(|data: &[u8]| {
    let (tx, mut rx) = unbounded_channel::<Bytes>();
    let endpoint = Endpoint::connect(
        ChannelRespondingHandler::shared(Arc::new(NestedMuxFactory)),
        LeafSender::shared(tx, TransportConfig::default()),
        TransportConfig::default(),
    );

    let mut failed = false;
    for message in records(data) {
        let result = endpoint.deliver(message);
        if failed {
            assert!(result.is_err());
        }
        failed |= result.is_err();
        while rx.try_recv().is_ok() {}
    }

    let ids = endpoint.connection().mux_ids();
    assert!(ids.iter().all(|id| !id.is_control()));
});
