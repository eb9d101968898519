//! Key package factory.
//!
//! A key package is a signed, single-use offer to join a group. Issuing one
//! stores its private init and leaf encryption keys in the [`KeyStore`]
//! under the package's reference, where Welcome processing finds them.

use dmls_crypto::x25519_public;
use dmls_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::mls::{Capabilities, KeyPackageData, Lifetime, ProposalKind},
};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    codec,
    config::AgentConfig,
    constants::{CIPHER_SUITE, PROTOCOL_VERSION},
    env::Environment,
    error::{DmlsError, Result},
    identity::{Identity, KeyPackageRef, KeyPackageSecrets, KeyStore, Secret32, member_id_from_key, verify_signature},
};

/// A key package whose signature and parameters have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedKeyPackage {
    /// Decoded content
    pub data: KeyPackageData,
    /// SHA-256 reference
    pub reference: KeyPackageRef,
}

/// Issue a fresh key package and record its secrets.
///
/// # Errors
///
/// - `KeyExhaustion` if the environment has no entropy
pub fn issue(
    identity: &Identity,
    key_store: &mut KeyStore,
    config: &AgentConfig,
    env: &impl Environment,
) -> Result<Frame> {
    let init_key = Secret32::random(env)?;
    let encryption_key = Secret32::random(env)?;

    let now = env.unix_time_secs();
    let lifetime = Lifetime { not_before: now, not_after: now.saturating_add(config.key_package_lifetime_secs) };

    let data = KeyPackageData {
        protocol_version: PROTOCOL_VERSION,
        cipher_suite: CIPHER_SUITE,
        member_id: identity.member_id(),
        signature_key: *identity.verifying_key(),
        init_key: x25519_public(init_key.expose()),
        encryption_key: x25519_public(encryption_key.expose()),
        lifetime,
        capabilities: Capabilities {
            versions: vec![PROTOCOL_VERSION],
            cipher_suites: vec![CIPHER_SUITE],
            proposals: vec![ProposalKind::Add, ProposalKind::Remove, ProposalKind::Update],
        },
        signature: Vec::new(),
    };

    let reference = key_package_ref(&data)?;
    let frame = codec::sign_frame(identity, FrameHeader::new(Opcode::KeyPackage), Payload::KeyPackage(data))?;

    key_store.insert(reference, KeyPackageSecrets { init_key, encryption_key, not_after: lifetime.not_after });
    debug!(reference = %reference, not_after = lifetime.not_after, "issued key package");

    Ok(frame)
}

/// SHA-256 over the key package's signed content.
pub fn key_package_ref(data: &KeyPackageData) -> Result<KeyPackageRef> {
    let content = Payload::KeyPackage(data.clone()).signing_data()?;
    Ok(KeyPackageRef(Sha256::digest(&content).into()))
}

/// Decode and verify a key package frame against the clock.
///
/// # Errors
///
/// - `MalformedMessage` if the frame is not a decodable key package
/// - `AuthenticationFailure` if the signature does not verify
/// - `ProtocolViolation` for an unsupported version or suite, a member id
///   that does not match the signature key, or an expired lifetime
pub fn verify(frame: &Frame, now: u64) -> Result<VerifiedKeyPackage> {
    let Payload::KeyPackage(data) = Payload::from_frame(frame)? else {
        return Err(DmlsError::malformed(format!(
            "expected key package, got opcode {:#06x}",
            frame.header.opcode()
        )));
    };

    let reference = verify_data(&data)?;

    if !data.lifetime.contains(now) {
        return Err(DmlsError::violation(format!(
            "key package {reference} outside lifetime [{}, {}]",
            data.lifetime.not_before, data.lifetime.not_after
        )));
    }

    Ok(VerifiedKeyPackage { data, reference })
}

/// Clock-independent checks: parameters and signature.
///
/// Used again when a commit applies an Add, where members must agree
/// regardless of when each of them processes the commit.
pub fn verify_data(data: &KeyPackageData) -> Result<KeyPackageRef> {
    if data.protocol_version != PROTOCOL_VERSION || !data.capabilities.versions.contains(&PROTOCOL_VERSION) {
        return Err(DmlsError::violation(format!(
            "unsupported protocol version {}",
            data.protocol_version
        )));
    }

    if data.cipher_suite != CIPHER_SUITE || !data.capabilities.cipher_suites.contains(&CIPHER_SUITE) {
        return Err(DmlsError::violation(format!("unsupported cipher suite {:#06x}", data.cipher_suite)));
    }

    if data.member_id != member_id_from_key(&data.signature_key) {
        return Err(DmlsError::violation("member id does not match signature key"));
    }

    let payload = Payload::KeyPackage(data.clone());
    let content = codec::signed_content(&FrameHeader::new(Opcode::KeyPackage), &payload)?;
    verify_signature(&data.signature_key, &content, &data.signature)?;

    key_package_ref(data)
}

/// Split a stream of concatenated key package frames and verify each.
pub fn verify_all(stream: &[u8], now: u64) -> Result<Vec<VerifiedKeyPackage>> {
    dmls_proto::FrameReader::new(stream)
        .map(|frame| verify(&frame?, now))
        .collect()
}
