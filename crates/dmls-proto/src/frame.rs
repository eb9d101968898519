//! Frame type combining header and payload, and a reader for concatenated
//! frame streams.
//!
//! A `Frame` is the unit every artifact travels in:
//! - 48-byte raw binary header (Big Endian)
//! - Variable-length raw payload bytes (already CBOR-encoded)
//!
//! This is a pure data holder. For typed payloads see
//! [`crate::Payload::into_frame`] and [`crate::Payload::from_frame`].

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame
///
/// Layout on the wire:
/// `[FrameHeader: 48 bytes, raw binary] + [payload: payload_size bytes]`
///
/// # Invariants
///
/// - Size Consistency: `payload.len()` matches `header.payload_size()`.
///   Enforced by [`Frame::new`] and verified by [`Frame::decode`].
/// - Size Limit: `payload.len()` never exceeds
///   [`FrameHeader::MAX_PAYLOAD_SIZE`]. Oversized frames are rejected by
///   [`Frame::encode`].
///
/// # Security
///
/// Structural validity only. Signatures and ciphertexts inside the payload
/// are checked by the group layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (48 bytes)
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, setting the header's `payload_size` from the
    /// payload length.
    ///
    /// Lengths that do not fit in a u32 saturate; such a frame is rejected
    /// by [`Frame::encode`].
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Number of bytes this frame occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer
    ///
    /// Writes: `[header (48 bytes)] + [payload (variable)]`
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds `MAX_PAYLOAD_SIZE`
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode frame into a fresh vector.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Returns a Frame with raw payload bytes (does NOT deserialize the
    /// payload). Bytes after the frame are ignored; use [`FrameReader`] to
    /// walk a stream of concatenated frames.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if header parsing fails (invalid magic, version, or
    ///   size limits)
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes are present
    ///   than the header claims
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(FrameHeader::SIZE..total_size) else {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        };

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}

/// Iterator over a stream of concatenated frames.
///
/// Yields frames in order. The first framing error is yielded once and ends
/// the iteration: after a bad header there is no reliable way to find the
/// next frame boundary.
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    remaining: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> FrameReader<'a> {
    /// Start reading frames from `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes, offset: 0, failed: false }
    }

    /// Byte offset of the next frame within the original input.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for FrameReader<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }

        match Frame::decode(self.remaining) {
            Ok(frame) => {
                let len = frame.encoded_len();
                self.remaining = self.remaining.get(len..).unwrap_or_default();
                self.offset += len;
                Some(Ok(frame))
            },
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            },
        }
    }
}
