//! Agent configuration, fixed at `gen-state` and persisted in the state file.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_KEY_PACKAGE_LIFETIME_SECS, MAX_RETENTION_EPOCHS},
    error::{DmlsError, Result},
};

/// Signature algorithm for the long-term identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// Ed25519 (RFC 8032)
    #[default]
    Ed25519,
}

impl FromStr for SignatureScheme {
    type Err = DmlsError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("ed25519") {
            Ok(Self::Ed25519)
        } else {
            Err(DmlsError::InvalidConfig { reason: format!("unsupported signature scheme: {s}") })
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => f.write_str("Ed25519"),
        }
    }
}

/// Per-participant settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identity signature algorithm
    pub signature_scheme: SignatureScheme,

    /// Prior epochs whose receive keys are kept after a commit (0 disables)
    pub retention_epochs: u32,

    /// Validity window of issued key packages
    pub key_package_lifetime_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            signature_scheme: SignatureScheme::Ed25519,
            retention_epochs: 1,
            key_package_lifetime_secs: DEFAULT_KEY_PACKAGE_LIFETIME_SECS,
        }
    }
}

impl AgentConfig {
    /// Reject values the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.retention_epochs > MAX_RETENTION_EPOCHS {
            return Err(DmlsError::InvalidConfig {
                reason: format!(
                    "retention_epochs {} exceeds maximum {MAX_RETENTION_EPOCHS}",
                    self.retention_epochs
                ),
            });
        }

        if self.key_package_lifetime_secs == 0 {
            return Err(DmlsError::InvalidConfig {
                reason: "key_package_lifetime_secs must be positive".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_case_insensitively() {
        assert_eq!("Ed25519".parse::<SignatureScheme>().unwrap(), SignatureScheme::Ed25519);
        assert_eq!("ED25519".parse::<SignatureScheme>().unwrap(), SignatureScheme::Ed25519);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = "ECDSA_SECP256R1_SHA256".parse::<SignatureScheme>().unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn default_is_valid() {
        let config = AgentConfig::default();
        assert_eq!(config.retention_epochs, 1);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = AgentConfig { retention_epochs: MAX_RETENTION_EPOCHS + 1, ..AgentConfig::default() };
        assert!(config.validate().is_err());

        let config = AgentConfig { key_package_lifetime_secs: 0, ..AgentConfig::default() };
        assert!(config.validate().is_err());
    }
}
