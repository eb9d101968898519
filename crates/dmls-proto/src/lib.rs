//! # DMLS Protocol: Wire Format
//!
//! Binary framing for every artifact the DMLS agent exchanges: key packages,
//! proposals, commits, welcomes and application messages.
//!
//! ## Layout
//!
//! Each artifact is one [`Frame`]:
//! - **FrameHeader**: 48 bytes of raw binary (Big Endian), parsed zero-copy
//! - **Payload**: CBOR-encoded struct selected by the header opcode
//!
//! Frames are self-delimiting. A stream of concatenated frames is split with
//! [`FrameReader`].
//!
//! ## Implementation Notes
//!
//! - **Zero-Copy Parsing**: [`FrameHeader`] is cast directly from input bytes
//!   with [`zerocopy`](https://docs.rs/zerocopy). Every 48-byte pattern is a
//!   valid header layout; semantic checks (magic, version, size) happen in
//!   [`FrameHeader::from_bytes`].
//!
//! - **CBOR for Payloads**: payload structs carry key material, ciphertexts
//!   and signatures. They are never interpreted by this crate beyond
//!   (de)serialization; authentication is the caller's job.
//!
//! ## Security Properties
//!
//! - Malformed frames are rejected before any payload bytes are copied.
//! - Payloads are capped at [`FrameHeader::MAX_PAYLOAD_SIZE`] (1 MiB).
//! - Unknown opcodes are errors, never skipped.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod opcodes;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameReader};
pub use header::FrameHeader;
pub use opcodes::Opcode;
pub use payloads::Payload;
