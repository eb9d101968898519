//! Message codec.
//!
//! Signs and verifies frames, encrypts handshake bodies under the epoch's
//! handshake key, encrypts and decrypts application messages with the
//! per-sender ratchets, and summarizes frames without any secrets.
//!
//! # Signed Content
//!
//! Every frame is signed over `header.signing_data() || payload.signing_data()`:
//! the 48-byte header with `payload_size` zeroed, followed by the CBOR payload
//! with an empty signature. The same header bytes are the AEAD associated
//! data, so group id, epoch, sender and counter cannot be rewritten on a
//! valid ciphertext.

use std::fmt;

use dmls_crypto::{
    EncryptedMessage, NONCE_RANDOM_SIZE, decrypt_message, decrypt_with_key, encrypt_message, encrypt_with_key,
};
use dmls_proto::{
    Frame, FrameHeader, FrameReader, Opcode, Payload,
    payloads::app::AppMessageData,
};
use tracing::debug;

use crate::{
    env::Environment,
    error::{DmlsError, Result},
    group::{GroupEvent, GroupState},
    identity::{Identity, verify_signature},
};

pub(crate) fn signed_content(header: &FrameHeader, payload: &Payload) -> Result<Vec<u8>> {
    let mut content = header.signing_data().to_vec();
    content.extend_from_slice(&payload.signing_data()?);
    Ok(content)
}

/// Sign `payload` under `header` and build the frame.
pub(crate) fn sign_frame(identity: &Identity, header: FrameHeader, mut payload: Payload) -> Result<Frame> {
    let content = signed_content(&header, &payload)?;
    payload.set_signature(identity.sign(&content));
    Ok(payload.into_frame(header)?)
}

/// Check the signature of a decoded frame.
pub(crate) fn verify_frame(signature_key: &[u8; 32], header: &FrameHeader, payload: &Payload) -> Result<()> {
    let content = signed_content(header, payload)?;
    verify_signature(signature_key, &content, payload.signature())
}

/// Encrypt a handshake body with a random nonce.
pub(crate) fn seal_handshake(
    key: &[u8; 32],
    header: &FrameHeader,
    body: &[u8],
    env: &impl Environment,
) -> Result<([u8; 24], Vec<u8>)> {
    let nonce = env.random_array()?;
    Ok((nonce, encrypt_with_key(key, &nonce, &header.signing_data(), body)))
}

/// Decrypt a handshake body.
pub(crate) fn open_handshake(
    key: &[u8; 32],
    header: &FrameHeader,
    nonce: &[u8; 24],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    Ok(decrypt_with_key(key, nonce, &header.signing_data(), ciphertext)?)
}

/// Encrypt one application message under our current send ratchet.
///
/// The header counter is the ratchet generation, so counters increase by
/// one per message and never repeat within an epoch.
///
/// # Errors
///
/// - `KeyExhaustion` if the ratchet or the entropy source is exhausted
pub fn encrypt(
    group: &mut GroupState,
    identity: &Identity,
    plaintext: &[u8],
    env: &impl Environment,
) -> Result<Frame> {
    let random_suffix: [u8; NONCE_RANDOM_SIZE] = env.random_array()?;
    let message_key = group.send_ratchet().advance()?;

    let mut header = group.header(Opcode::AppMessage);
    header.set_counter(u64::from(message_key.generation()));

    let encrypted = encrypt_message(
        plaintext,
        &message_key,
        &header.signing_data(),
        header.epoch(),
        header.sender_index(),
        random_suffix,
    );

    sign_frame(
        identity,
        header,
        Payload::AppMessage(AppMessageData {
            nonce: encrypted.nonce,
            ciphertext: encrypted.ciphertext,
            signature: Vec::new(),
        }),
    )
}

/// Decrypt an application message from another member.
///
/// The sender's ratchet is only moved once the message authenticates, so a
/// forged message leaves the receive state untouched.
///
/// # Errors
///
/// - `ProtocolViolation` for another group or an unknown sender
/// - `EpochMismatch` for a future epoch
/// - `EpochTooOld` for an epoch outside the retention window
/// - `AuthenticationFailure` if the signature or AEAD tag fails
/// - `ReplayedCounter` if the counter is not above every counter seen from
///   that sender in that epoch
pub fn decrypt(group: &mut GroupState, frame: &Frame) -> Result<GroupEvent> {
    let header = &frame.header;
    group.check_group(header.group_id())?;

    let epoch = header.epoch();
    let sender = header.sender_index();
    let own_leaf = group.own_leaf();

    let view = group.receive_view(epoch)?;
    if sender == own_leaf {
        return Ok(GroupEvent::Ignored { reason: "own application message" });
    }

    let state = view
        .senders
        .get_mut(&sender)
        .ok_or_else(|| DmlsError::violation(format!("no sender at leaf {sender} in epoch {epoch}")))?;

    let Payload::AppMessage(data) = Payload::from_frame(frame)? else {
        return Err(DmlsError::malformed("expected application message payload"));
    };
    verify_frame(&state.signature_key, header, &Payload::AppMessage(data.clone()))?;

    let counter = u32::try_from(header.counter())
        .map_err(|_| DmlsError::malformed(format!("counter {} out of range", header.counter())))?;
    if counter < state.ratchet.generation() {
        return Err(DmlsError::ReplayedCounter { sender_index: sender, counter: header.counter() });
    }

    let mut ratchet = state.ratchet.clone();
    let message_key = ratchet.advance_to(counter)?;

    let encrypted = EncryptedMessage {
        epoch,
        sender_index: sender,
        generation: counter,
        nonce: data.nonce,
        ciphertext: data.ciphertext,
    };
    let plaintext = decrypt_message(&encrypted, &message_key, &header.signing_data())?;
    state.ratchet = ratchet;

    debug!(epoch, sender, counter, "decrypted application message");
    Ok(GroupEvent::Delivered { sender, plaintext })
}

/// Structural summary of one frame. Needs no secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    /// Byte offset of the frame in the stream
    pub offset: usize,
    /// Opcode name
    pub kind: &'static str,
    /// Declared group id
    pub group_id: u128,
    /// Declared epoch
    pub epoch: u64,
    /// Declared sender leaf
    pub sender_index: u32,
    /// Declared counter
    pub counter: u64,
    /// Payload size in bytes
    pub payload_size: u32,
    /// Payload-specific detail, when the payload decodes
    pub detail: Option<String>,
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{} {} group={:032x} epoch={} sender={} counter={} size={}",
            self.offset, self.kind, self.group_id, self.epoch, self.sender_index, self.counter, self.payload_size
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " {detail}")?;
        }
        Ok(())
    }
}

/// Result of inspecting a stream: every frame that parsed, then the framing
/// error that stopped the scan, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Parsed frames
    pub frames: Vec<FrameSummary>,
    /// Framing error and the offset it occurred at
    pub error: Option<(usize, DmlsError)>,
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "{frame}")?;
        }
        if let Some((offset, err)) = &self.error {
            writeln!(f, "@{offset} error: {err}")?;
        }
        Ok(())
    }
}

/// Summarize a stream of concatenated frames.
pub fn inspect(bytes: &[u8]) -> Inspection {
    let mut reader = FrameReader::new(bytes);
    let mut frames = Vec::new();

    loop {
        let offset = reader.offset();
        match reader.next() {
            None => return Inspection { frames, error: None },
            Some(Err(err)) => return Inspection { frames, error: Some((offset, err.into())) },
            Some(Ok(frame)) => frames.push(summarize(offset, &frame)),
        }
    }
}

fn summarize(offset: usize, frame: &Frame) -> FrameSummary {
    let header = &frame.header;
    let kind = header.opcode_enum().map_or("unknown", Opcode::name);

    let detail = match Payload::from_frame(frame) {
        Ok(Payload::KeyPackage(kp)) => Some(format!(
            "member={:016x} lifetime=[{}, {}]",
            kp.member_id, kp.lifetime.not_before, kp.lifetime.not_after
        )),
        Ok(Payload::Welcome(welcome)) => Some(format!("key_package={}", hex::encode(welcome.key_package_ref))),
        Ok(_) => None,
        Err(err) => Some(format!("undecodable payload: {err}")),
    };

    FrameSummary {
        offset,
        kind,
        group_id: header.group_id(),
        epoch: header.epoch(),
        sender_index: header.sender_index(),
        counter: header.counter(),
        payload_size: header.payload_size(),
        detail,
    }
}
