//! Per-sender HMAC chain.
//!
//! Each step turns the chain key into one message key and a successor chain
//! key, then wipes the old chain key. A holder of the current ratchet cannot
//! recompute keys for generations it has already passed.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// Maximum number of generations a receiver skips in one step.
pub const MAX_SKIP: u32 = 1000;

/// A message key derived from the ratchet.
///
/// Used for exactly one encryption or decryption and then dropped.
#[derive(Clone)]
pub struct MessageKey {
    key: [u8; 32],
    generation: u32,
}

impl MessageKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Ratchet generation this key was derived from.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageKey").field("generation", &self.generation).finish_non_exhaustive()
    }
}

/// Forward-secure symmetric ratchet.
///
/// Each [`advance()`](Self::advance) call:
/// 1. Derives a message key from the current chain key
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key
///
/// The ratchet is plain data so it can be persisted with the rest of the
/// group state. Receivers clone it before trying a message and keep the
/// advanced copy only if the message authenticates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricRatchet {
    chain_key: [u8; 32],
    generation: u32,
}

impl SymmetricRatchet {
    /// Create a new ratchet from a sender key seed (generation 0).
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { chain_key: *seed, generation: 0 }
    }

    /// Next generation this ratchet will produce.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Advance the ratchet and return the key for the current generation.
    pub fn advance(&mut self) -> Result<MessageKey, CryptoError> {
        if self.generation == u32::MAX {
            return Err(CryptoError::GenerationOverflow { current: self.generation });
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain_key = self.derive(CHAIN_LABEL);

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;

        let current_gen = self.generation;
        self.generation += 1;

        Ok(MessageKey { key: message_key, generation: current_gen })
    }

    /// Advance the ratchet to `target` and return that generation's key.
    ///
    /// Keys for skipped generations are discarded, so a message older than
    /// the ratchet position can never be decrypted again.
    pub fn advance_to(&mut self, target: u32) -> Result<MessageKey, CryptoError> {
        if target < self.generation || target - self.generation > MAX_SKIP {
            return Err(CryptoError::RatchetTooFarBehind {
                current: self.generation,
                requested: target,
            });
        }

        loop {
            let key = self.advance()?;
            if key.generation() == target {
                return Ok(key);
            }
        }
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);

        let mut key = [0u8; 32];
        key.copy_from_slice(&mac.finalize().into_bytes());
        key
    }
}

impl Drop for SymmetricRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

impl std::fmt::Debug for SymmetricRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricRatchet")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
