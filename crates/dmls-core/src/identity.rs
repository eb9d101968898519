//! Long-term identity and the key store of one-time key package secrets.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    config::SignatureScheme,
    env::Environment,
    error::{DmlsError, Result},
};

/// 32 bytes of private key material.
///
/// Zeroized on drop; `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret32([u8; 32]);

impl Secret32 {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Fresh random secret.
    pub fn random(env: &impl Environment) -> Result<Self> {
        Ok(Self(env.random_array()?))
    }

    /// Borrow the raw bytes.
    pub fn expose(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for Secret32 {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret32(..)")
    }
}

/// Stable member identifier: the first 8 bytes of the verifying key.
pub fn member_id_from_key(verifying_key: &[u8; 32]) -> u64 {
    let mut id = [0u8; 8];
    id.copy_from_slice(&verifying_key[..8]);
    u64::from_be_bytes(id)
}

/// Verify an Ed25519 signature.
///
/// # Errors
///
/// - `AuthenticationFailure` for a bad key, a malformed signature, or a
///   signature that does not verify
pub fn verify_signature(verifying_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let key = VerifyingKey::from_bytes(verifying_key)
        .map_err(|e| DmlsError::auth(format!("invalid signature key: {e}")))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| DmlsError::auth(format!("malformed signature: {e}")))?;

    key.verify_strict(message, &signature).map_err(|_| DmlsError::auth("signature mismatch"))
}

/// A participant's long-term signing identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    scheme: SignatureScheme,
    signing_key: Secret32,
    verifying_key: [u8; 32],
    member_id: u64,
    generation: u32,
}

impl Identity {
    /// Generate a fresh identity.
    ///
    /// # Errors
    ///
    /// - `KeyExhaustion` if the environment has no entropy
    pub fn generate(scheme: SignatureScheme, env: &impl Environment) -> Result<Self> {
        let signing_key = Secret32::random(env)?;

        let verifying_key = match scheme {
            SignatureScheme::Ed25519 => SigningKey::from_bytes(signing_key.expose()).verifying_key().to_bytes(),
        };

        Ok(Self {
            scheme,
            signing_key,
            verifying_key,
            member_id: member_id_from_key(&verifying_key),
            generation: 0,
        })
    }

    /// Sign `message` with the long-term key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(self.signing_key.expose()).sign(message).to_bytes().to_vec()
    }

    /// Ed25519 verifying key.
    pub fn verifying_key(&self) -> &[u8; 32] {
        &self.verifying_key
    }

    /// Stable identifier derived from the verifying key.
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Key rotation counter (starts at 0).
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Signature algorithm.
    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("scheme", &self.scheme)
            .field("member_id", &format_args!("{:016x}", self.member_id))
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// SHA-256 reference of a key package's signed content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyPackageRef(pub [u8; 32]);

impl fmt::Display for KeyPackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for KeyPackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPackageRef({})", hex::encode(&self.0[..8]))
    }
}

/// Private halves of one issued key package.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackageSecrets {
    /// X25519 private key the Welcome is sealed to
    pub init_key: Secret32,
    /// X25519 private leaf encryption key, kept once joined
    pub encryption_key: Secret32,
    /// Expiry of the key package (unix seconds)
    pub not_after: u64,
}

impl fmt::Debug for KeyPackageSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPackageSecrets").field("not_after", &self.not_after).finish_non_exhaustive()
    }
}

/// Secrets of issued key packages plus the ledger of consumed references.
///
/// The ledger covers both our own key packages (consumed by a Welcome) and
/// foreign key packages we placed into a group. A reference in the ledger is
/// never usable again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStore {
    secrets: BTreeMap<KeyPackageRef, KeyPackageSecrets>,
    consumed: BTreeSet<KeyPackageRef>,
}

impl KeyStore {
    /// Record the secrets of a freshly issued key package.
    pub fn insert(&mut self, reference: KeyPackageRef, secrets: KeyPackageSecrets) {
        self.secrets.insert(reference, secrets);
    }

    /// Secrets of an unconsumed key package we issued.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if the reference was already consumed
    /// - `UnknownKeyPackage` if we never issued it
    pub fn get(&self, reference: &KeyPackageRef) -> Result<&KeyPackageSecrets> {
        self.ensure_unconsumed(reference)?;
        self.secrets
            .get(reference)
            .ok_or_else(|| DmlsError::UnknownKeyPackage { reference: reference.to_string() })
    }

    /// Consume one of our key packages, returning its secrets.
    pub fn take(&mut self, reference: &KeyPackageRef) -> Result<KeyPackageSecrets> {
        self.get(reference)?;
        let secrets = self
            .secrets
            .remove(reference)
            .ok_or_else(|| DmlsError::UnknownKeyPackage { reference: reference.to_string() })?;
        self.consumed.insert(*reference);
        Ok(secrets)
    }

    /// Record a foreign key package as consumed by one of our group
    /// operations.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if it was consumed before
    pub fn mark_consumed(&mut self, reference: KeyPackageRef) -> Result<()> {
        self.ensure_unconsumed(&reference)?;
        self.secrets.remove(&reference);
        self.consumed.insert(reference);
        Ok(())
    }

    /// Fail if `reference` is in the consumed ledger.
    pub fn ensure_unconsumed(&self, reference: &KeyPackageRef) -> Result<()> {
        if self.consumed.contains(reference) {
            return Err(DmlsError::violation(format!("key package {reference} already consumed")));
        }
        Ok(())
    }

    /// Number of issued, unconsumed key packages.
    pub fn available(&self) -> usize {
        self.secrets.len()
    }

    /// Number of consumed references.
    pub fn consumed(&self) -> usize {
        self.consumed.len()
    }

    /// Drop secrets of key packages that expired before `now`.
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let before = self.secrets.len();
        self.secrets.retain(|_, s| s.not_after >= now);
        before - self.secrets.len()
    }
}
