//! Frame opcodes.
//!
//! The opcode in the header selects the payload struct. Handshake artifacts
//! live in `0x1000-0x1FFF`, application traffic in `0x2000-0x2FFF`.

/// Operation code identifying a frame's payload type
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Handshake (0x1000-0x1FFF)
    /// Signed single-use join offer
    KeyPackage = 0x1000,
    /// Add / Update / Remove proposal
    Proposal = 0x1001,
    /// Commit advancing the epoch
    Commit = 0x1002,
    /// Bootstrap for a newly added member
    Welcome = 0x1003,

    // Application (0x2000-0x2FFF)
    /// Encrypted application message
    AppMessage = 0x2000,
}

impl Opcode {
    /// Convert to raw u16 value
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Convert from raw u16 value
    ///
    /// Returns `None` for values that are not a known opcode. Callers must
    /// treat those as protocol errors.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1000 => Some(Self::KeyPackage),
            0x1001 => Some(Self::Proposal),
            0x1002 => Some(Self::Commit),
            0x1003 => Some(Self::Welcome),
            0x2000 => Some(Self::AppMessage),
            _ => None,
        }
    }

    /// Short lowercase name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::KeyPackage => "key-package",
            Self::Proposal => "proposal",
            Self::Commit => "commit",
            Self::Welcome => "welcome",
            Self::AppMessage => "application",
        }
    }

    /// Whether this frame belongs to the handshake range.
    #[must_use]
    pub const fn is_handshake(self) -> bool {
        matches!(self.to_u16(), 0x1000..=0x1FFF)
    }
}
