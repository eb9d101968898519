//! X25519 sealed boxes.
//!
//! Seals a payload to a recipient's X25519 public key: ECDH with a
//! caller-supplied ephemeral secret, HKDF over the shared secret with both
//! public keys as salt, then XChaCha20-Poly1305. Used for welcome group
//! secrets (sealed to a key package init key) and commit secrets (sealed to
//! each member's leaf encryption key).

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    CryptoError,
    sender_keys::{decrypt_with_key, encrypt_with_key},
};

const SEAL_LABEL: &[u8] = b"dmls seal";

/// Payload sealed to one X25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    /// Sender's ephemeral public key
    pub ephemeral_key: [u8; 32],
    /// `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// Ciphertext including the Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// X25519 public key for a private scalar.
pub fn x25519_public(secret: &[u8; 32]) -> [u8; 32] {
    PublicKey::from(&StaticSecret::from(*secret)).to_bytes()
}

/// Seal `plaintext` to `recipient`.
///
/// `ephemeral_secret` and `nonce` must be fresh random bytes. `aad` binds
/// the box to its context (the group layer uses the group context digest).
///
/// # Errors
///
/// - `WeakPublicKey` if `recipient` is a low-order point
pub fn seal(
    recipient: &[u8; 32],
    ephemeral_secret: [u8; 32],
    nonce: [u8; 24],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<SealedBox, CryptoError> {
    let ephemeral = StaticSecret::from(ephemeral_secret);
    let ephemeral_key = PublicKey::from(&ephemeral).to_bytes();

    let mut key = box_key(&ephemeral, recipient, &ephemeral_key, recipient)?;
    let ciphertext = encrypt_with_key(&key, &nonce, aad, plaintext);
    key.zeroize();

    Ok(SealedBox { ephemeral_key, nonce, ciphertext })
}

/// Open a box sealed to the public key of `recipient_secret`.
///
/// # Errors
///
/// - `WeakPublicKey` if the ephemeral key is a low-order point
/// - `DecryptionFailed` if the box was not sealed to this key or was
///   tampered with
pub fn open(recipient_secret: &[u8; 32], sealed: &SealedBox, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let secret = StaticSecret::from(*recipient_secret);
    let recipient = PublicKey::from(&secret).to_bytes();

    let mut key = box_key(&secret, &sealed.ephemeral_key, &sealed.ephemeral_key, &recipient)?;
    let plaintext = decrypt_with_key(&key, &sealed.nonce, aad, &sealed.ciphertext);
    key.zeroize();

    plaintext
}

/// Shared AEAD key. Both sides feed (ephemeral, recipient) public keys into
/// the salt in the same order.
fn box_key(
    own: &StaticSecret,
    peer: &[u8; 32],
    ephemeral_key: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let shared = own.diffie_hellman(&PublicKey::from(*peer));
    if !shared.was_contributory() {
        return Err(CryptoError::WeakPublicKey);
    }

    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_key);
    salt[32..].copy_from_slice(recipient);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(SEAL_LABEL, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT_SECRET: [u8; 32] = [0x42; 32];

    #[test]
    fn seal_open_round_trip() {
        let recipient = x25519_public(&RECIPIENT_SECRET);
        let sealed = seal(&recipient, [7; 32], [1; 24], b"ctx", b"group secrets").unwrap();

        assert_eq!(open(&RECIPIENT_SECRET, &sealed, b"ctx").unwrap(), b"group secrets");
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let recipient = x25519_public(&RECIPIENT_SECRET);
        let sealed = seal(&recipient, [7; 32], [1; 24], b"ctx", b"group secrets").unwrap();

        let result = open(&[0x43; 32], &sealed, b"ctx");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn aad_is_bound() {
        let recipient = x25519_public(&RECIPIENT_SECRET);
        let sealed = seal(&recipient, [7; 32], [1; 24], b"ctx", b"secret").unwrap();

        assert!(open(&RECIPIENT_SECRET, &sealed, b"other").is_err());
    }

    #[test]
    fn low_order_recipient_rejected() {
        let result = seal(&[0; 32], [7; 32], [1; 24], b"", b"secret");
        assert_eq!(result, Err(CryptoError::WeakPublicKey));
    }

    #[test]
    fn sealing_is_deterministic_in_its_inputs() {
        let recipient = x25519_public(&RECIPIENT_SECRET);
        let a = seal(&recipient, [7; 32], [1; 24], b"", b"x").unwrap();
        let b = seal(&recipient, [7; 32], [1; 24], b"", b"x").unwrap();
        let c = seal(&recipient, [8; 32], [1; 24], b"", b"x").unwrap();

        assert_eq!(a, b);
        assert_ne!(a.ciphertext, c.ciphertext);
    }
}
