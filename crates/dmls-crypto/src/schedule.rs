//! Epoch key schedule.
//!
//! An epoch secret is derived once per epoch, either from a random seed when
//! the group is created or from the prior epoch secret plus commit inputs.
//! Everything else an epoch needs is expanded from it with a distinct label.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::sender_keys::derive_sender_key_seed;

type HmacSha256 = Hmac<Sha256>;

const EPOCH_LABEL: &[u8] = b"dmls epoch";
const SENDER_LABEL: &[u8] = b"dmls sender";
const HANDSHAKE_LABEL: &[u8] = b"dmls handshake";
const CONFIRMATION_LABEL: &[u8] = b"dmls confirm";

/// Epoch-0 secret for a new group.
///
/// `HKDF(salt = group_id, ikm = seed, info = "dmls epoch" || group_context)`
pub fn initial_epoch_secret(group_id: u128, seed: &[u8; 32], group_context: &[u8]) -> [u8; 32] {
    extract_expand(&group_id.to_be_bytes(), seed, EPOCH_LABEL, group_context)
}

/// Next epoch secret after a commit.
///
/// `HKDF(salt = prior, ikm = commit inputs, info = "dmls epoch" || group_context)`
///
/// `ikm` is the concatenated entropy of the applied proposals followed by
/// the commit secret. Members that apply the same commit pass identical
/// inputs and get bit-identical output.
pub fn next_epoch_secret(prior: &[u8; 32], ikm: &[u8], group_context: &[u8]) -> [u8; 32] {
    extract_expand(prior, ikm, EPOCH_LABEL, group_context)
}

fn extract_expand(salt: &[u8], ikm: &[u8], label: &[u8], context: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut info = Vec::with_capacity(label.len() + context.len());
    info.extend_from_slice(label);
    info.extend_from_slice(context);

    let mut out = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    out
}

fn expand_label(secret: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let Ok(hkdf) = Hkdf::<Sha256>::from_prk(secret) else {
        unreachable!("32-byte PRK is valid for HKDF-SHA256");
    };
    let mut out = [0u8; 32];
    let Ok(()) = hkdf.expand(label, &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    out
}

/// Secrets of one epoch.
///
/// Zeroized on drop. `Debug` prints nothing but the type name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSecrets {
    epoch_secret: [u8; 32],
    sender_secret: [u8; 32],
    handshake_key: [u8; 32],
    confirmation_key: [u8; 32],
}

impl EpochSecrets {
    /// Expand the per-purpose keys from an epoch secret.
    pub fn derive(epoch_secret: [u8; 32]) -> Self {
        Self {
            sender_secret: expand_label(&epoch_secret, SENDER_LABEL),
            handshake_key: expand_label(&epoch_secret, HANDSHAKE_LABEL),
            confirmation_key: expand_label(&epoch_secret, CONFIRMATION_LABEL),
            epoch_secret,
        }
    }

    /// The epoch secret itself (input to the next epoch).
    pub fn epoch_secret(&self) -> &[u8; 32] {
        &self.epoch_secret
    }

    /// Key for proposal and commit bodies.
    pub fn handshake_key(&self) -> &[u8; 32] {
        &self.handshake_key
    }

    /// Sender key seed for one leaf in this epoch.
    pub fn sender_seed(&self, epoch: u64, leaf: u32) -> [u8; 32] {
        derive_sender_key_seed(&self.sender_secret, epoch, leaf)
    }

    /// Confirmation tag over a commit body.
    pub fn confirmation_tag(&self, content: &[u8]) -> [u8; 32] {
        let mac = self.confirmation_mac(content);
        let mut tag = [0u8; 32];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }

    /// Constant-time check of a received confirmation tag.
    pub fn verify_confirmation_tag(&self, content: &[u8], tag: &[u8; 32]) -> bool {
        self.confirmation_mac(content).verify_slice(tag).is_ok()
    }

    fn confirmation_mac(&self, content: &[u8]) -> HmacSha256 {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.confirmation_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(content);
        mac
    }
}

impl Drop for EpochSecrets {
    fn drop(&mut self) {
        self.epoch_secret.zeroize();
        self.sender_secret.zeroize();
        self.handshake_key.zeroize();
        self.confirmation_key.zeroize();
    }
}

impl std::fmt::Debug for EpochSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochSecrets").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_distinct() {
        let secrets = EpochSecrets::derive([1; 32]);
        assert_ne!(secrets.handshake_key(), secrets.epoch_secret());
        assert_ne!(secrets.sender_seed(0, 0), *secrets.handshake_key());
        assert_ne!(secrets.confirmation_tag(b"x"), *secrets.handshake_key());
    }

    #[test]
    fn next_epoch_depends_on_every_input() {
        let base = next_epoch_secret(&[1; 32], b"entropy", b"ctx");
        assert_eq!(base, next_epoch_secret(&[1; 32], b"entropy", b"ctx"));
        assert_ne!(base, next_epoch_secret(&[2; 32], b"entropy", b"ctx"));
        assert_ne!(base, next_epoch_secret(&[1; 32], b"entropz", b"ctx"));
        assert_ne!(base, next_epoch_secret(&[1; 32], b"entropy", b"cty"));
    }

    #[test]
    fn initial_secret_is_bound_to_group() {
        let a = initial_epoch_secret(1, &[9; 32], b"ctx");
        let b = initial_epoch_secret(2, &[9; 32], b"ctx");
        assert_ne!(a, b);
    }

    #[test]
    fn confirmation_tag_verifies() {
        let secrets = EpochSecrets::derive([3; 32]);
        let tag = secrets.confirmation_tag(b"commit body");

        assert!(secrets.verify_confirmation_tag(b"commit body", &tag));
        assert!(!secrets.verify_confirmation_tag(b"commit bodz", &tag));
        assert!(!EpochSecrets::derive([4; 32]).verify_confirmation_tag(b"commit body", &tag));
    }

    #[test]
    fn debug_is_redacted() {
        let rendered = format!("{:?}", EpochSecrets::derive([0x5A; 32]));
        assert_eq!(rendered, "EpochSecrets { .. }");
    }
}
