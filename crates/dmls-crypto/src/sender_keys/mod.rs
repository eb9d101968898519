//! Sender keys: per-epoch, per-member ratchets for application messages.
//!
//! Each member derives one seed per leaf from the epoch's sender secret and
//! runs a [`SymmetricRatchet`] over it. The sending member advances its own
//! ratchet once per message; receivers advance a copy of the sender's
//! ratchet up to the message's generation.

mod derivation;
mod encryption;
mod ratchet;

pub use derivation::derive_sender_key_seed;
pub use encryption::{
    EncryptedMessage, NONCE_RANDOM_SIZE, decrypt_message, decrypt_with_key, encrypt_message,
    encrypt_with_key,
};
pub use ratchet::{MAX_SKIP, MessageKey, SymmetricRatchet};
