//! Frame bodies.
//!
//! A body is the bare CBOR map of one payload struct. Which struct is chosen
//! by the header opcode, so the encoding carries no enum tag of its own.

pub mod app;
pub mod mls;

use bytes::BufMut;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// # Security
///
/// - No Variant Tag: the header opcode alone selects the struct, so an
///   opcode/payload mismatch fails to decode instead of being reinterpreted.
/// - Every variant carries an Ed25519 signature. [`Payload::signing_data`]
///   returns the bytes that signature covers apart from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Signed join offer
    KeyPackage(mls::KeyPackageData),
    /// Encrypted proposal
    Proposal(mls::ProposalData),
    /// Encrypted commit
    Commit(mls::CommitData),
    /// Welcome for one added member
    Welcome(mls::WelcomeData),
    /// Encrypted application message
    AppMessage(app::AppMessageData),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::KeyPackage(_) => Opcode::KeyPackage,
            Self::Proposal(_) => Opcode::Proposal,
            Self::Commit(_) => Opcode::Commit,
            Self::Welcome(_) => Opcode::Welcome,
            Self::AppMessage(_) => Opcode::AppMessage,
        }
    }

    /// Signature carried by the payload.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        match self {
            Self::KeyPackage(inner) => &inner.signature,
            Self::Proposal(inner) => &inner.signature,
            Self::Commit(inner) => &inner.signature,
            Self::Welcome(inner) => &inner.signature,
            Self::AppMessage(inner) => &inner.signature,
        }
    }

    /// Replace the payload's signature.
    pub fn set_signature(&mut self, signature: Vec<u8>) {
        match self {
            Self::KeyPackage(inner) => inner.signature = signature,
            Self::Proposal(inner) => inner.signature = signature,
            Self::Commit(inner) => inner.signature = signature,
            Self::Welcome(inner) => inner.signature = signature,
            Self::AppMessage(inner) => inner.signature = signature,
        }
    }

    /// Payload half of the signed content: the CBOR encoding of this payload
    /// with an empty signature.
    ///
    /// Deterministic: ciborium writes struct fields in declaration order, so
    /// signer and verifier produce identical bytes.
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.set_signature(Vec::new());
        let mut buf = Vec::new();
        unsigned.encode(&mut buf)?;
        Ok(buf)
    }

    /// Write the CBOR body. Size limits are applied by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::KeyPackage(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Proposal(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Commit(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Welcome(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AppMessage(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Read the body struct that `opcode` selects.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::KeyPackage => Self::KeyPackage(from_cbor(bytes)?),
            Opcode::Proposal => Self::Proposal(from_cbor(bytes)?),
            Opcode::Commit => Self::Commit(from_cbor(bytes)?),
            Opcode::Welcome => Self::Welcome(from_cbor(bytes)?),
            Opcode::AppMessage => Self::AppMessage(from_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a frame, setting the header opcode and size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse payload from a frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidOpcode` if the header opcode is unknown
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::InvalidOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

/// Serialize any value to CBOR.
///
/// Used by the group layer for the bodies it encrypts into handshake
/// payloads.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a CBOR value.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}
