//! Message encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure; random bytes are provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use super::ratchet::MessageKey;
use crate::CryptoError;

/// Size of the random suffix in the nonce (8 bytes)
pub const NONCE_RANDOM_SIZE: usize = 8;

/// An encrypted application message with the metadata needed to pick the
/// decryption key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    /// The epoch this message was encrypted under
    pub epoch: u64,
    /// The sender's leaf index
    pub sender_index: u32,
    /// The ratchet generation (message counter)
    pub generation: u32,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Encrypt a message under a ratchet message key.
///
/// `aad` is authenticated but not encrypted; the group layer passes the
/// frame header's signing data so epoch, sender and counter cannot be
/// swapped on a valid ciphertext.
///
/// # Security
///
/// - Nonce is unique per (epoch, sender, generation, random)
/// - Caller MUST provide cryptographically secure random bytes in production
pub fn encrypt_message(
    plaintext: &[u8],
    message_key: &MessageKey,
    aad: &[u8],
    epoch: u64,
    sender_index: u32,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> EncryptedMessage {
    let nonce = build_nonce(epoch, sender_index, message_key.generation(), random_suffix);
    let ciphertext = encrypt_with_key(message_key.key(), &nonce, aad, plaintext);

    EncryptedMessage {
        epoch,
        sender_index,
        generation: message_key.generation(),
        nonce,
        ciphertext,
    }
}

/// Decrypt a message with the key for its generation.
///
/// # Errors
///
/// - `DecryptionFailed`: generation mismatch, wrong key, wrong AAD or
///   tampered ciphertext
pub fn decrypt_message(
    encrypted: &EncryptedMessage,
    message_key: &MessageKey,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if message_key.generation() != encrypted.generation {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "generation mismatch: key is {}, message is {}",
                message_key.generation(),
                encrypted.generation
            ),
        });
    }

    decrypt_with_key(message_key.key(), &encrypted.nonce, aad, &encrypted.ciphertext)
}

/// Raw AEAD encryption under a 32-byte key.
///
/// Used directly for handshake bodies, where the nonce is fully random.
pub fn encrypt_with_key(key: &[u8; 32], nonce: &[u8; 24], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

/// Raw AEAD decryption under a 32-byte key.
pub fn decrypt_with_key(
    key: &[u8; 32],
    nonce: &[u8; 24],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

/// Nonce layout: `epoch(8) || sender_index(4) || generation(4) || random(8)`,
/// all integers big-endian.
fn build_nonce(
    epoch: u64,
    sender_index: u32,
    generation: u32,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    let (counters, random) = nonce.split_at_mut(16);
    counters[..8].copy_from_slice(&epoch.to_be_bytes());
    counters[8..12].copy_from_slice(&sender_index.to_be_bytes());
    counters[12..].copy_from_slice(&generation.to_be_bytes());
    random.copy_from_slice(&random_suffix);
    nonce
}
