//! Persisted participant state.
//!
//! The whole snapshot (configuration, identity, key store, optional group) is
//! one CBOR document. ciborium writes struct fields in declaration order and
//! maps in key order, so `store` is deterministic and
//! `load(store(x)) == x`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::AgentConfig,
    env::Environment,
    error::{DmlsError, Result},
    group::GroupState,
    identity::{Identity, KeyStore},
};

/// Snapshot format version.
pub const STATE_FORMAT: u8 = 1;

/// Everything one participant persists between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    format: u8,
    /// Settings chosen at creation
    pub config: AgentConfig,
    /// Long-term identity
    pub identity: Identity,
    /// Key package secrets and consumed references
    pub key_store: KeyStore,
    /// The group we are in, if any
    pub group: Option<GroupState>,
}

impl AgentState {
    /// Fresh state with a new identity and no group.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `config` fails validation
    /// - `KeyExhaustion` if the environment has no entropy
    pub fn create(config: AgentConfig, env: &impl Environment) -> Result<Self> {
        config.validate()?;
        let identity = Identity::generate(config.signature_scheme, env)?;

        Ok(Self { format: STATE_FORMAT, config, identity, key_store: KeyStore::default(), group: None })
    }

    /// Decode a stored snapshot.
    ///
    /// # Errors
    ///
    /// - `CorruptState` if the bytes do not decode, carry an unknown format
    ///   version or an invalid configuration
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let state: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| DmlsError::CorruptState { reason: e.to_string() })?;

        if state.format != STATE_FORMAT {
            return Err(DmlsError::CorruptState {
                reason: format!("unsupported state format {}", state.format),
            });
        }
        state
            .config
            .validate()
            .map_err(|e| DmlsError::CorruptState { reason: e.to_string() })?;

        Ok(state)
    }

    /// Encode the snapshot.
    pub fn store(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| DmlsError::CorruptState { reason: e.to_string() })?;
        Ok(buf)
    }

    /// Human-readable overview.
    pub fn summary(&self) -> StateSummary<'_> {
        StateSummary(self)
    }
}

/// `Display` adapter returned by [`AgentState::summary`].
pub struct StateSummary<'a>(&'a AgentState);

impl fmt::Display for StateSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0;
        writeln!(
            f,
            "identity: member={:016x} scheme={} generation={}",
            state.identity.member_id(),
            state.identity.scheme(),
            state.identity.generation()
        )?;
        writeln!(
            f,
            "key packages: available={} consumed={}",
            state.key_store.available(),
            state.key_store.consumed()
        )?;

        let Some(group) = &state.group else {
            return writeln!(f, "group: none");
        };

        writeln!(
            f,
            "group: id={:032x} epoch={} leaf={} decryptable={:?}",
            group.group_id(),
            group.epoch(),
            group.own_leaf(),
            group.decryptable_epochs()
        )?;
        writeln!(f, "  authenticator: {}", hex::encode(group.epoch_authenticator()))?;
        for member in group.members() {
            let marker = if member.leaf == group.own_leaf() { " (self)" } else { "" };
            writeln!(f, "  leaf {}: member={:016x}{marker}", member.leaf, member.member_id)?;
        }
        for pending in group.pending() {
            writeln!(f, "  pending {:?} from leaf {}", pending.proposal.kind(), pending.sender)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SeededEnv;

    #[test]
    fn store_load_round_trip() {
        let env = SeededEnv::with_seed(1);
        let state = AgentState::create(AgentConfig::default(), &env).unwrap();

        let bytes = state.store().unwrap();
        assert_eq!(AgentState::load(&bytes).unwrap(), state);
    }

    #[test]
    fn store_is_deterministic() {
        let env = SeededEnv::with_seed(2);
        let state = AgentState::create(AgentConfig::default(), &env).unwrap();

        assert_eq!(state.store().unwrap(), state.clone().store().unwrap());
    }

    #[test]
    fn garbage_is_corrupt_state() {
        let err = AgentState::load(b"not cbor at all").unwrap_err();
        assert_eq!(err.code(), "corrupt_state");
    }

    #[test]
    fn invalid_config_rejected_at_create() {
        let env = SeededEnv::with_seed(3);
        let config = AgentConfig { key_package_lifetime_secs: 0, ..AgentConfig::default() };

        let err = AgentState::create(config, &env).unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn summary_without_group() {
        let env = SeededEnv::with_seed(4);
        let state = AgentState::create(AgentConfig::default(), &env).unwrap();
        let rendered = state.summary().to_string();

        assert!(rendered.contains("group: none"));
        assert!(rendered.contains("scheme=Ed25519"));
    }
}
