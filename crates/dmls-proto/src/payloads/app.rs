//! Application message payload.

use serde::{Deserialize, Serialize};

/// Encrypted application message
///
/// Encrypted with XChaCha20-Poly1305 under a per-message key from the
/// sender's ratchet. Epoch, sender leaf and counter live in the frame
/// header, which is bound into the AEAD as associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMessageData {
    /// Nonce for `XChaCha20` (24 bytes).
    /// Structure: `[epoch:8][sender_index:4][generation:4][random:8]`
    pub nonce: [u8; 24],

    /// Ciphertext including 16-byte Poly1305 authentication tag.
    pub ciphertext: Vec<u8>,

    /// Ed25519 signature of the sender
    pub signature: Vec<u8>,
}
