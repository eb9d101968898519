//! Fuzz target for frame header boundaries and stream splitting
//!
//! # Strategy
//!
//! - Magic: valid, off-by-one, random
//! - Payload size: zero, at max, just over max, `u32::MAX`, random
//! - Opcode: every known opcode plus arbitrary values
//! - Trailing bytes: none, fewer than declared, more than declared
//!
//! # Invariants
//!
//! - `payload_size > MAX_PAYLOAD_SIZE` MUST return `PayloadTooLarge`
//! - Invalid magic MUST return `InvalidMagic`
//! - A decoded frame re-encodes to exactly `48 + payload_size` bytes
//! - `FrameReader` never panics and stops after the first error

#![no_main]

use arbitrary::Arbitrary;
use dmls_proto::{Frame, FrameHeader, FrameReader, ProtocolError};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    magic: Magic,
    version: u8,
    opcode: u16,
    payload_size: PayloadSize,
    sender_index: u32,
    group_id: u128,
    epoch: u64,
    counter: u64,
    body: Vec<u8>,
    raw_stream: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
enum Magic {
    Valid,
    OffByOne(u8),
    Random(u32),
}

#[derive(Debug, Arbitrary)]
enum PayloadSize {
    Zero,
    Body,
    AtMax,
    JustOverMax,
    MaxU32,
    Random(u32),
}

fuzz_target!(|input: Input| {
    let magic = match input.magic {
        Magic::Valid => FrameHeader::MAGIC,
        Magic::OffByOne(delta) => FrameHeader::MAGIC.wrapping_add(u32::from(delta).max(1)),
        Magic::Random(m) => m,
    };
    let payload_size = match input.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::Body => input.body.len().min(u32::MAX as usize) as u32,
        PayloadSize::AtMax => FrameHeader::MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => FrameHeader::MAX_PAYLOAD_SIZE + 1,
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(s) => s,
    };

    let mut bytes = Vec::with_capacity(FrameHeader::SIZE + input.body.len());
    bytes.extend_from_slice(&magic.to_be_bytes());
    bytes.push(input.version);
    bytes.push(0);
    bytes.extend_from_slice(&input.opcode.to_be_bytes());
    bytes.extend_from_slice(&payload_size.to_be_bytes());
    bytes.extend_from_slice(&input.sender_index.to_be_bytes());
    bytes.extend_from_slice(&input.group_id.to_be_bytes());
    bytes.extend_from_slice(&input.epoch.to_be_bytes());
    bytes.extend_from_slice(&input.counter.to_be_bytes());
    bytes.extend_from_slice(&input.body);

    match Frame::decode(&bytes) {
        Ok(frame) => {
            assert_eq!(magic, FrameHeader::MAGIC);
            assert!(payload_size <= FrameHeader::MAX_PAYLOAD_SIZE);
            assert_eq!(frame.encoded_len(), FrameHeader::SIZE + payload_size as usize);
        },
        Err(ProtocolError::InvalidMagic) => assert_ne!(magic, FrameHeader::MAGIC),
        Err(ProtocolError::PayloadTooLarge { .. }) => {
            assert!(payload_size > FrameHeader::MAX_PAYLOAD_SIZE);
        },
        Err(_) => {},
    }

    let mut stream = bytes;
    stream.extend_from_slice(&input.raw_stream);
    let mut reader = FrameReader::new(&stream);
    for item in reader.by_ref() {
        if item.is_err() {
            break;
        }
    }
    assert!(reader.next().is_none(), "reader continued after an error");
});
