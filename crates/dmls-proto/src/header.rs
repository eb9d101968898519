//! The 48-byte routing header every DMLS frame starts with.
//!
//! All integers are big-endian. The header carries everything needed to route and order an artifact
//! (group, epoch, sender, counter) so diagnostics can summarise a frame
//! without any group secrets.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 48-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so the struct has no alignment
/// requirements and can be cast from any input buffer.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits means every 48-byte
/// pattern is a valid value; parsing untrusted bytes cannot cause undefined
/// behavior. The header is not authenticated on its own: payload signatures
/// cover [`FrameHeader::signing_data`], so a tampered header fails
/// verification in the group layer.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],             // 0x444D4C53 ("DMLS")
    version: u8,                // 0x01
    reserved: u8,               // zero on encode, ignored on decode
    pub(crate) opcode: [u8; 2], // u16 operation code

    // Size and sender (8 bytes: 8-15)
    pub(crate) payload_size: [u8; 4],
    sender_index: [u8; 4], // u32 leaf index of the sender

    // Group binding (32 bytes: 16-47)
    group_id: [u8; 16], // u128 group identifier
    epoch: [u8; 8],     // u64 epoch
    counter: [u8; 8],   // u64 per-sender message counter (application frames)
}

impl FrameHeader {
    /// Size of the serialized header (48 bytes)
    pub const SIZE: usize = 48;

    /// Magic number: "DMLS" in ASCII (0x444D4C53)
    pub const MAGIC: u32 = 0x444D_4C53;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a new header with the specified opcode and all routing fields
    /// zeroed.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            reserved: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            payload_size: [0; 4],
            sender_index: [0; 4],
            group_id: [0; 16],
            epoch: [0; 8],
            counter: [0; 8],
        }
    }

    /// Borrow a header view from the front of `bytes`.
    ///
    /// Trailing bytes beyond [`Self::SIZE`] are left for the caller.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 48 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    ///
    /// The opcode is NOT validated here so that diagnostics can still report
    /// frames carrying unknown opcodes; see [`Self::opcode_enum`].
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    ///
    /// The reserved byte is always written as zero.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr[5] = 0;
        arr
    }

    /// Protocol magic number (0x444D4C53 = "DMLS").
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Payload size in bytes (max 1 MiB).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Leaf index of the sending member.
    #[must_use]
    pub fn sender_index(&self) -> u32 {
        u32::from_be_bytes(self.sender_index)
    }

    /// 128-bit group identifier.
    #[must_use]
    pub fn group_id(&self) -> u128 {
        u128::from_be_bytes(self.group_id)
    }

    /// Epoch the frame was produced in (or, for welcomes, the epoch joined).
    #[must_use]
    pub fn epoch(&self) -> u64 {
        u64::from_be_bytes(self.epoch)
    }

    /// Per-sender message counter. Zero for handshake frames.
    #[must_use]
    pub fn counter(&self) -> u64 {
        u64::from_be_bytes(self.counter)
    }

    /// Bytes covered by the payload signature.
    ///
    /// The full header with `payload_size` zeroed, so the signature can be
    /// computed before the payload length is known.
    #[must_use]
    pub fn signing_data(&self) -> [u8; Self::SIZE] {
        let mut data = self.to_bytes();
        data[8..12].fill(0);
        data
    }

    /// Set the sender's leaf index.
    pub fn set_sender_index(&mut self, sender_index: u32) {
        self.sender_index = sender_index.to_be_bytes();
    }

    /// Set the group identifier.
    pub fn set_group_id(&mut self, group_id: u128) {
        self.group_id = group_id.to_be_bytes();
    }

    /// Set the epoch.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch.to_be_bytes();
    }

    /// Set the per-sender message counter.
    pub fn set_counter(&mut self, counter: u64) {
        self.counter = counter.to_be_bytes();
    }

    /// Set payload size. [`crate::Frame::new`] does this automatically.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("payload_size", &self.payload_size())
            .field("sender_index", &self.sender_index())
            .field("group_id", &format!("{:#034x}", self.group_id()))
            .field("epoch", &self.epoch())
            .field("counter", &self.counter())
            .finish()
    }
}

// packed repr: compare the encoded form
impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}
