//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from ratchets, AEAD and sealed boxes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Requested generation is behind the ratchet or too far ahead of it
    #[error("ratchet cannot reach generation {requested} from {current}")]
    RatchetTooFarBehind {
        /// Current ratchet generation
        current: u32,
        /// Requested generation
        requested: u32,
    },

    /// Ratchet generation would overflow
    #[error("ratchet generation overflow at {current}")]
    GenerationOverflow {
        /// Current generation when overflow was detected
        current: u32,
    },

    /// AEAD open failed (authentication tag mismatch or wrong key)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// X25519 agreement produced an all-zero secret (low-order point)
    #[error("non-contributory X25519 public key")]
    WeakPublicKey,
}

impl CryptoError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors indicate forged input or a bug. A ratchet that cannot
    /// reach a generation may still succeed for a different message.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DecryptionFailed { .. }
            | Self::InvalidKeyLength { .. }
            | Self::GenerationOverflow { .. }
            | Self::WeakPublicKey => true,

            Self::RatchetTooFarBehind { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failure_is_fatal() {
        let err = CryptoError::DecryptionFailed { reason: "tag".to_string() };
        assert!(err.is_fatal());
    }

    #[test]
    fn ratchet_gap_is_not_fatal() {
        let err = CryptoError::RatchetTooFarBehind { current: 5, requested: 2 };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "ratchet cannot reach generation 2 from 5");
    }
}
