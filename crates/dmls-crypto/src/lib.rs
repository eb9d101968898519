//! DMLS Cryptographic Primitives
//!
//! Pure building blocks for the group key schedule. Every function is
//! deterministic; callers supply random bytes so tests can run from a fixed
//! seed.
//!
//! # Key Lifecycle
//!
//! ```text
//! prior epoch secret ─┐
//! proposal entropy ───┼─► HKDF ─► epoch secret
//! commit secret ──────┘              │
//!                                    ├─► sender secret ─► HKDF per leaf ─► Symmetric Ratchet ─► Message Keys
//!                                    ├─► handshake key (proposals, commits)
//!                                    └─► confirmation key (commit confirmation tag)
//! ```
//!
//! Commit secrets and welcome group secrets travel in X25519 sealed boxes
//! addressed to a member's leaf encryption key or a key package's init key.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Ratchet advancement overwrites chain keys; message keys are zeroized on
//!   drop
//! - Each commit derives a fresh epoch secret; the old one is dropped once
//!   its receive ratchets have been retained
//!
//! Post-Compromise Security:
//! - Every commit mixes in a fresh commit secret only current members can
//!   open, plus the entropy of each applied proposal

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod schedule;
pub mod seal;
pub mod sender_keys;

pub use error::CryptoError;
pub use schedule::{EpochSecrets, initial_epoch_secret, next_epoch_secret};
pub use seal::{SealedBox, open, seal, x25519_public};
pub use sender_keys::{
    EncryptedMessage, MAX_SKIP, MessageKey, NONCE_RANDOM_SIZE, SymmetricRatchet, decrypt_message,
    decrypt_with_key, derive_sender_key_seed, encrypt_message, encrypt_with_key,
};
