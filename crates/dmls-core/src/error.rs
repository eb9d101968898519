//! Error taxonomy for the DMLS core.
//!
//! Every variant is terminal for the operation it occurs in. Batch
//! processing reports errors per item using [`DmlsError::code`].

use dmls_crypto::CryptoError;
use dmls_proto::ProtocolError;
use thiserror::Error;

use crate::env::EntropyError;

/// Errors from identity, key package, group and codec operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DmlsError {
    /// Unsupported or inconsistent configuration
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// Persisted state could not be decoded
    #[error("corrupt state: {reason}")]
    CorruptState {
        /// Decoder error
        reason: String,
    },

    /// Entropy source unavailable or a counter space exhausted
    #[error("key exhaustion: {reason}")]
    KeyExhaustion {
        /// What ran out
        reason: String,
    },

    /// No stored secret for the referenced key package
    #[error("unknown key package {reference}")]
    UnknownKeyPackage {
        /// Hex key package reference
        reference: String,
    },

    /// Signature, AEAD tag or confirmation tag did not verify
    #[error("authentication failure: {reason}")]
    AuthenticationFailure {
        /// Which check failed
        reason: String,
    },

    /// Handshake message targets a different epoch than the current one
    #[error("epoch mismatch: expected {expected}, got {actual}")]
    EpochMismatch {
        /// Receiver's current epoch
        expected: u64,
        /// Epoch named by the message
        actual: u64,
    },

    /// Message epoch is older than the retention window
    #[error("epoch {epoch} too old (oldest retained is {oldest})")]
    EpochTooOld {
        /// Epoch named by the message
        epoch: u64,
        /// Oldest epoch still decryptable
        oldest: u64,
    },

    /// Sender counter already observed
    #[error("replayed counter {counter} from leaf {sender_index}")]
    ReplayedCounter {
        /// Sender leaf index
        sender_index: u32,
        /// Replayed counter
        counter: u64,
    },

    /// Well-formed input that breaks a protocol rule
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Rule that was broken
        reason: String,
    },

    /// Frame or payload could not be decoded
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Decoder error
        reason: String,
    },
}

impl DmlsError {
    /// Stable snake-case name for reports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "invalid_config",
            Self::CorruptState { .. } => "corrupt_state",
            Self::KeyExhaustion { .. } => "key_exhaustion",
            Self::UnknownKeyPackage { .. } => "unknown_key_package",
            Self::AuthenticationFailure { .. } => "authentication_failure",
            Self::EpochMismatch { .. } => "epoch_mismatch",
            Self::EpochTooOld { .. } => "epoch_too_old",
            Self::ReplayedCounter { .. } => "replayed_counter",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::MalformedMessage { .. } => "malformed_message",
        }
    }

    pub(crate) fn violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation { reason: reason.into() }
    }

    pub(crate) fn auth(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailure { reason: reason.into() }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage { reason: reason.into() }
    }
}

impl From<ProtocolError> for DmlsError {
    fn from(err: ProtocolError) -> Self {
        Self::MalformedMessage { reason: err.to_string() }
    }
}

impl From<CryptoError> for DmlsError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed { .. } | CryptoError::WeakPublicKey => {
                Self::AuthenticationFailure { reason: err.to_string() }
            },
            CryptoError::GenerationOverflow { .. } => Self::KeyExhaustion { reason: err.to_string() },
            CryptoError::RatchetTooFarBehind { .. } => {
                Self::ProtocolViolation { reason: err.to_string() }
            },
            CryptoError::InvalidKeyLength { .. } => Self::MalformedMessage { reason: err.to_string() },
        }
    }
}

impl From<EntropyError> for DmlsError {
    fn from(err: EntropyError) -> Self {
        Self::KeyExhaustion { reason: err.reason }
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, DmlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_failure_maps_to_authentication() {
        let err: DmlsError = CryptoError::DecryptionFailed { reason: "tag".into() }.into();
        assert_eq!(err.code(), "authentication_failure");
    }

    #[test]
    fn framing_errors_are_malformed() {
        let err: DmlsError = ProtocolError::InvalidMagic.into();
        assert_eq!(err.code(), "malformed_message");
    }

    #[test]
    fn entropy_failure_is_key_exhaustion() {
        let err: DmlsError = EntropyError { reason: "no rng".into() }.into();
        assert_eq!(err, DmlsError::KeyExhaustion { reason: "no rng".into() });
    }
}
