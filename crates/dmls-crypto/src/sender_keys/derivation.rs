//! Sender key seed derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;

/// Label used for sender key derivation
const SENDER_KEY_LABEL: &[u8] = b"dmlsSenderV1";

/// Derive a sender key seed from the epoch's sender secret.
///
/// The seed is unique per (epoch, leaf) pair and initializes the
/// [`super::SymmetricRatchet`] for that leaf.
///
/// # Security
///
/// - Different epochs produce different seeds
/// - Different leaves produce different seeds (sender isolation)
/// - Deterministic: every member derives the same seed for the same leaf
pub fn derive_sender_key_seed(sender_secret: &[u8], epoch: u64, sender_index: u32) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, sender_secret);

    // info = label || epoch || sender_index
    let mut info = Vec::with_capacity(SENDER_KEY_LABEL.len() + 12);
    info.extend_from_slice(SENDER_KEY_LABEL);
    info.extend_from_slice(&epoch.to_be_bytes());
    info.extend_from_slice(&sender_index.to_be_bytes());

    let mut seed = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut seed) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    seed
}
