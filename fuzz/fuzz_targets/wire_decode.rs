//! Every wire decoder on arbitrary bytes.
//!
//! Decoders must never panic, and whatever they accept must re-encode to the
//! exact bytes they were given.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{
    AllocationReply, HandshakeRequest, MuxHeader, NegotiationMessage, SealedMessage,
};

fuzz_target!(|data: &[u8]| {
    if let Ok((id, payload)) = MuxHeader::split(data) {
        assert_eq!(payload.len() + MuxHeader::SIZE, data.len());
        assert_eq!(id.to_bytes(), data[..MuxHeader::SIZE]);
    }

    if let Ok(reply) = AllocationReply::decode(data) {
        assert_eq!(reply.to_bytes()[..], *data);
    }

    match NegotiationMessage::decode(data) {
        Ok(NegotiationMessage::Open { request_id }) => {
            assert_eq!(NegotiationMessage::open(request_id)[..], *data);
        },
        Ok(NegotiationMessage::Close { channel_id }) => {
            assert_eq!(NegotiationMessage::close(channel_id)[..], *data);
        },
        Ok(NegotiationMessage::Payload(frame)) => {
            assert_eq!(frame, &data[1..]);
        },
        Err(_) => {},
    }

    if let Ok(request) = HandshakeRequest::decode(data) {
        assert_eq!(request.to_vec(), data);
    }

    if let Ok(sealed) = SealedMessage::decode(data) {
        assert_eq!(sealed.ciphertext.len() + sealed.nonce.len(), data.len());
    }
});
