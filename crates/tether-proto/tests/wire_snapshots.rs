//! Snapshot tests for wire format stability.
//!
//! Every frame a peer can observe is pinned here as hex. If one of these
//! changes, hosts and enclaves built from different revisions stop
//! understanding each other.

use insta::assert_snapshot;
use tether_proto::{
    AllocationReply, HandshakeRequest, MuxHeader, MuxId, NegotiationMessage, ProtocolId,
    RequestId,
};

#[test]
fn snapshot_mux_header() {
    assert_snapshot!(hex::encode(MuxHeader::new(MuxId::new(3)).to_bytes()), @"00000003");
}

#[test]
fn snapshot_control_sentinel() {
    assert_snapshot!(hex::encode(MuxHeader::new(MuxId::CONTROL).to_bytes()), @"ffffffff");
}

#[test]
fn snapshot_open() {
    assert_snapshot!(hex::encode(NegotiationMessage::open(RequestId::new(0))), @"0000000000");
}

#[test]
fn snapshot_close() {
    assert_snapshot!(hex::encode(NegotiationMessage::close(MuxId::new(258))), @"0100000102");
}

#[test]
fn snapshot_allocation_reply() {
    let reply = AllocationReply::new(RequestId::new(0), MuxId::new(7));
    assert_snapshot!(hex::encode(reply.to_bytes()), @"ffffffff000000000000000000000007");
}

#[test]
fn snapshot_handshake_request() {
    let key = [0xab; 4];
    let request = HandshakeRequest { protocol_id: ProtocolId::X25519_AES_GCM, public_key: &key };
    assert_snapshot!(hex::encode(request.to_vec()), @"00000000abababab");
}
