//! Property-based tests for frame encoding, decoding, and stream splitting.

use bytes::Bytes;
use dmls_proto::{
    Frame, FrameHeader, FrameReader, Opcode, Payload, ProtocolError,
    payloads::mls::{Capabilities, KeyPackageData, Lifetime, ProposalKind},
};
use proptest::prelude::*;

fn arbitrary_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::KeyPackage),
        Just(Opcode::Proposal),
        Just(Opcode::Commit),
        Just(Opcode::Welcome),
        Just(Opcode::AppMessage),
    ]
}

fn arbitrary_header() -> impl Strategy<Value = FrameHeader> {
    (arbitrary_opcode(), any::<u128>(), any::<u32>(), any::<u64>(), any::<u64>()).prop_map(
        |(opcode, group_id, sender_index, epoch, counter)| {
            let mut header = FrameHeader::new(opcode);
            header.set_group_id(group_id);
            header.set_sender_index(sender_index);
            header.set_epoch(epoch);
            header.set_counter(counter);
            header
        },
    )
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_header(), prop::collection::vec(any::<u8>(), 0..512))
        .prop_map(|(header, payload)| Frame::new(header, Bytes::from(payload)))
}

#[test]
fn prop_frame_stream_splits_back_into_frames() {
    proptest!(|(frames in prop::collection::vec(arbitrary_frame(), 0..8))| {
        let mut wire = Vec::new();
        for frame in &frames {
            frame.encode(&mut wire).expect("encode should succeed");
        }

        let decoded: Vec<Frame> =
            FrameReader::new(&wire).collect::<Result<_, _>>().expect("stream should split");

        // PROPERTY: concatenation is self-delimiting
        prop_assert_eq!(decoded, frames);
    });
}

#[test]
fn prop_header_fields_preserved() {
    proptest!(|(header in arbitrary_header())| {
        let bytes = header.to_bytes();
        let decoded = FrameHeader::from_bytes(&bytes).expect("from_bytes should succeed");

        prop_assert_eq!(decoded.opcode(), header.opcode());
        prop_assert_eq!(decoded.group_id(), header.group_id());
        prop_assert_eq!(decoded.sender_index(), header.sender_index());
        prop_assert_eq!(decoded.epoch(), header.epoch());
        prop_assert_eq!(decoded.counter(), header.counter());
    });
}

#[test]
fn prop_truncated_stream_reports_error() {
    proptest!(|(
        frame in arbitrary_frame().prop_filter("needs payload", |f| !f.payload.is_empty()),
        cut in 1usize..48,
    )| {
        let wire = frame.to_vec().expect("encode should succeed");
        let cut = cut.min(frame.payload.len());
        let truncated = &wire[..wire.len() - cut];

        let results: Vec<_> = FrameReader::new(truncated).collect();

        // PROPERTY: a short tail is an error, never a silently shorter frame
        prop_assert_eq!(results.len(), 1);
        let is_truncated = matches!(results[0], Err(ProtocolError::FrameTruncated { .. }));
        prop_assert!(is_truncated);
    });
}

#[test]
fn prop_random_bytes_never_panic() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        for frame in FrameReader::new(&bytes).flatten() {
            let _ = Payload::from_frame(&frame);
        }
    });
}

#[test]
fn key_package_payload_survives_framing() {
    let payload = Payload::KeyPackage(KeyPackageData {
        protocol_version: 1,
        cipher_suite: 1,
        member_id: 0xDEAD_BEEF,
        signature_key: [1; 32],
        init_key: [2; 32],
        encryption_key: [3; 32],
        lifetime: Lifetime { not_before: 100, not_after: 200 },
        capabilities: Capabilities {
            versions: vec![1],
            cipher_suites: vec![1],
            proposals: vec![ProposalKind::Add, ProposalKind::Remove, ProposalKind::Update],
        },
        signature: vec![0xAB; 64],
    });

    let frame = payload.clone().into_frame(FrameHeader::new(Opcode::KeyPackage)).unwrap();
    let wire = frame.to_vec().unwrap();

    let parsed = Frame::decode(&wire).unwrap();
    assert_eq!(Payload::from_frame(&parsed).unwrap(), payload);
}
