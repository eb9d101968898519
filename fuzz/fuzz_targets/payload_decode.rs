//! Fuzz target for CBOR payload decoding
//!
//! Arbitrary bytes are decoded as the payload of every opcode: malformed
//! CBOR, type confusion between payload kinds, oversized collections.
//!
//! # Invariants
//!
//! - Decoding never panics
//! - A payload that decodes re-encodes and decodes to the same value

#![no_main]

use dmls_proto::{Opcode, Payload};
use libfuzzer_sys::fuzz_target;

const OPCODES: [Opcode; 5] =
    [Opcode::KeyPackage, Opcode::Proposal, Opcode::Commit, Opcode::Welcome, Opcode::AppMessage];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let Ok(payload) = Payload::decode(opcode, data) else {
            continue;
        };

        let mut encoded = Vec::new();
        payload.encode(&mut encoded).expect("decoded payload re-encodes");
        let again = Payload::decode(opcode, &encoded).expect("re-encoded payload decodes");
        assert_eq!(again, payload);
    }
});
