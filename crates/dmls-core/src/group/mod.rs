//! Group epoch engine.
//!
//! One [`GroupState`] is one participant's private view of a group. Views
//! held by different participants converge only through the handshake frames
//! they exchange: every member applying the same commit to the same epoch
//! derives bit-identical secrets.
//!
//! # State Machine
//!
//! ```text
//! (no group) ── create / join ──► Active(epoch 0 or welcome epoch)
//!                                      │
//!                                 commit / process_commit
//!                                      ▼
//!                               Active(epoch + 1) ── removed ──► (no group)
//! ```
//!
//! # Invariants
//!
//! - Epoch only increases, by exactly one per applied commit
//! - Leaf indices are never reused within a group
//! - Member entries are unique per signature key
//! - Receive ratchets of at most `retention_epochs` prior epochs are kept
//!
//! Operations mutate `self` in place and may leave it half-updated when they
//! fail. Callers that need atomicity run them on a clone (see
//! [`crate::agent`]).

mod commit;
mod proposal;
mod welcome;

use std::collections::{BTreeMap, VecDeque};

use dmls_crypto::{EpochSecrets, SymmetricRatchet, initial_epoch_secret, x25519_public};
use dmls_proto::{Frame, FrameHeader, Opcode, payloads::mls::ProposalKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

pub use commit::CommitOutput;
pub use proposal::{PendingProposal, Proposal, ProposalRef};

use crate::{
    config::AgentConfig,
    constants::MAX_MEMBERS,
    env::Environment,
    error::{DmlsError, Result},
    identity::{Identity, KeyStore, Secret32},
    key_package::VerifiedKeyPackage,
};

const AUTHENTICATOR_LABEL: &[u8] = b"dmls authenticator";

/// One leaf of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Stable position in the group
    pub leaf: u32,
    /// Identifier derived from the signature key
    pub member_id: u64,
    /// Ed25519 verifying key
    pub signature_key: [u8; 32],
    /// X25519 leaf encryption key (commit secrets are sealed to it)
    pub encryption_key: [u8; 32],
}

/// Receive state for one remote sender in one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SenderState {
    pub(crate) signature_key: [u8; 32],
    pub(crate) ratchet: SymmetricRatchet,
}

/// Receive ratchets of every remote sender in one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReceiveEpoch {
    pub(crate) epoch: u64,
    pub(crate) senders: BTreeMap<u32, SenderState>,
}

impl ReceiveEpoch {
    fn derive(secrets: &EpochSecrets, epoch: u64, members: &[Member], own_leaf: u32) -> Self {
        let senders = members
            .iter()
            .filter(|m| m.leaf != own_leaf)
            .map(|m| {
                let ratchet = SymmetricRatchet::new(&secrets.sender_seed(epoch, m.leaf));
                (m.leaf, SenderState { signature_key: m.signature_key, ratchet })
            })
            .collect();

        Self { epoch, senders }
    }
}

/// What processing one inbound group frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// Application message decrypted
    Delivered {
        /// Sender leaf
        sender: u32,
        /// Recovered plaintext
        plaintext: Vec<u8>,
    },

    /// Proposal validated and held pending
    Queued {
        /// Proposer leaf
        sender: u32,
        /// Proposal type
        kind: ProposalKind,
    },

    /// Commit applied
    Advanced {
        /// New epoch
        epoch: u64,
    },

    /// Our own artifact or a duplicate; nothing to do
    Ignored {
        /// Why it was skipped
        reason: &'static str,
    },

    /// A commit removed our leaf; the group must be dropped
    Removed {
        /// Epoch the removing commit was made in
        epoch: u64,
    },
}

/// One participant's view of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    group_id: u128,
    epoch: u64,
    members: Vec<Member>,
    next_leaf: u32,
    own_leaf: u32,
    own_encryption_secret: Secret32,
    secrets: EpochSecrets,
    sender: SymmetricRatchet,
    current: ReceiveEpoch,
    retained: VecDeque<ReceiveEpoch>,
    retention_epochs: u32,
    pending: Vec<PendingProposal>,
}

impl GroupState {
    /// Create a group at epoch 0 with ourselves at leaf 0 and one leaf per
    /// key package, in input order.
    ///
    /// Consumes every key package and returns one Welcome per added member.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if a key package was consumed before, two
    ///   entries share an identity, or the group would exceed
    ///   [`MAX_MEMBERS`]
    /// - `KeyExhaustion` if the environment has no entropy
    pub fn create(
        identity: &Identity,
        key_packages: &[VerifiedKeyPackage],
        key_store: &mut KeyStore,
        config: &AgentConfig,
        env: &impl Environment,
    ) -> Result<(Self, Vec<Frame>)> {
        if key_packages.len() >= MAX_MEMBERS {
            return Err(DmlsError::violation(format!(
                "group of {} members exceeds maximum {MAX_MEMBERS}",
                key_packages.len() + 1
            )));
        }

        let own_encryption_secret = Secret32::random(env)?;
        let mut members = vec![Member {
            leaf: 0,
            member_id: identity.member_id(),
            signature_key: *identity.verifying_key(),
            encryption_key: x25519_public(own_encryption_secret.expose()),
        }];

        for kp in key_packages {
            if members.iter().any(|m| m.signature_key == kp.data.signature_key) {
                return Err(DmlsError::violation(format!(
                    "duplicate member {:016x}",
                    kp.data.member_id
                )));
            }
            key_store.mark_consumed(kp.reference)?;

            members.push(Member {
                leaf: leaf_index(members.len())?,
                member_id: kp.data.member_id,
                signature_key: kp.data.signature_key,
                encryption_key: kp.data.encryption_key,
            });
        }

        let group_id = env.random_u128()?;
        let seed = Secret32::random(env)?;
        let context = group_context(group_id, 0, &members);
        let secrets = EpochSecrets::derive(initial_epoch_secret(group_id, seed.expose(), &context));

        let next_leaf = leaf_index(members.len())?;
        let group = Self::from_parts(
            group_id,
            0,
            members,
            next_leaf,
            0,
            own_encryption_secret,
            secrets,
            config.retention_epochs,
        );

        let welcomes = key_packages
            .iter()
            .map(|kp| group.welcome_for(identity, &kp.data, kp.reference, env))
            .collect::<Result<Vec<_>>>()?;

        info!(
            group_id = %format_args!("{group_id:032x}"),
            members = group.members.len(),
            "created group"
        );

        Ok((group, welcomes))
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        group_id: u128,
        epoch: u64,
        members: Vec<Member>,
        next_leaf: u32,
        own_leaf: u32,
        own_encryption_secret: Secret32,
        secrets: EpochSecrets,
        retention_epochs: u32,
    ) -> Self {
        let current = ReceiveEpoch::derive(&secrets, epoch, &members, own_leaf);
        let sender = SymmetricRatchet::new(&secrets.sender_seed(epoch, own_leaf));

        Self {
            group_id,
            epoch,
            members,
            next_leaf,
            own_leaf,
            own_encryption_secret,
            secrets,
            sender,
            current,
            retained: VecDeque::new(),
            retention_epochs,
            pending: Vec::new(),
        }
    }

    /// Install the secrets of `epoch`, retaining the outgoing receive view.
    ///
    /// The outgoing send ratchet and epoch secrets are dropped (and zeroized).
    fn advance(&mut self, epoch: u64, secrets: EpochSecrets) {
        let view = ReceiveEpoch::derive(&secrets, epoch, &self.members, self.own_leaf);
        let previous = std::mem::replace(&mut self.current, view);

        self.retained.push_front(previous);
        self.retained.truncate(usize::try_from(self.retention_epochs).unwrap_or(usize::MAX));

        self.sender = SymmetricRatchet::new(&secrets.sender_seed(epoch, self.own_leaf));
        self.secrets = secrets;
        self.epoch = epoch;
        self.pending.clear();

        info!(
            group_id = %format_args!("{:032x}", self.group_id),
            epoch,
            members = self.members.len(),
            "advanced epoch"
        );
    }

    /// Header for a frame we send in the current epoch.
    pub(crate) fn header(&self, opcode: Opcode) -> FrameHeader {
        let mut header = FrameHeader::new(opcode);
        header.set_group_id(self.group_id);
        header.set_epoch(self.epoch);
        header.set_sender_index(self.own_leaf);
        header
    }

    pub(crate) fn secrets(&self) -> &EpochSecrets {
        &self.secrets
    }

    pub(crate) fn send_ratchet(&mut self) -> &mut SymmetricRatchet {
        &mut self.sender
    }

    /// Receive view for `epoch`: the current one or a retained one.
    ///
    /// # Errors
    ///
    /// - `EpochMismatch` if `epoch` is in the future
    /// - `EpochTooOld` if it fell out of the retention window
    pub(crate) fn receive_view(&mut self, epoch: u64) -> Result<&mut ReceiveEpoch> {
        if epoch > self.epoch {
            return Err(DmlsError::EpochMismatch { expected: self.epoch, actual: epoch });
        }

        let oldest = self.oldest_epoch();
        if epoch == self.epoch {
            return Ok(&mut self.current);
        }

        self.retained
            .iter_mut()
            .find(|view| view.epoch == epoch)
            .ok_or(DmlsError::EpochTooOld { epoch, oldest })
    }

    /// Group identifier.
    pub fn group_id(&self) -> u128 {
        self.group_id
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Members ordered by leaf index.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Member at `leaf`, if present.
    pub fn member(&self, leaf: u32) -> Option<&Member> {
        self.members.iter().find(|m| m.leaf == leaf)
    }

    /// Our own leaf index.
    pub fn own_leaf(&self) -> u32 {
        self.own_leaf
    }

    /// Proposals held for the next commit.
    pub fn pending(&self) -> &[PendingProposal] {
        &self.pending
    }

    /// Epochs whose messages can still be decrypted, newest first.
    pub fn decryptable_epochs(&self) -> Vec<u64> {
        std::iter::once(self.epoch).chain(self.retained.iter().map(|view| view.epoch)).collect()
    }

    /// Oldest epoch still decryptable.
    pub fn oldest_epoch(&self) -> u64 {
        self.retained.back().map_or(self.epoch, |view| view.epoch)
    }

    /// Next generation of our send ratchet.
    pub fn send_generation(&self) -> u32 {
        self.sender.generation()
    }

    /// Public digest of the epoch's secrets. Members agree on it exactly when
    /// they derived the same epoch secret.
    pub fn epoch_authenticator(&self) -> [u8; 32] {
        self.secrets.confirmation_tag(AUTHENTICATOR_LABEL)
    }

    /// Context digest of the current epoch.
    pub fn context(&self) -> [u8; 32] {
        group_context(self.group_id, self.epoch, &self.members)
    }
}

/// SHA-256 over the group id, epoch and every member entry.
///
/// Bound into epoch secret derivation and used as AAD for sealed commit
/// secrets, so members that disagree on membership cannot agree on keys.
pub fn group_context(group_id: u128, epoch: u64, members: &[Member]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(group_id.to_be_bytes());
    hasher.update(epoch.to_be_bytes());
    for member in members {
        hasher.update(member.leaf.to_be_bytes());
        hasher.update(member.member_id.to_be_bytes());
        hasher.update(member.signature_key);
        hasher.update(member.encryption_key);
    }
    hasher.finalize().into()
}

fn leaf_index(position: usize) -> Result<u32> {
    u32::try_from(position).map_err(|_| DmlsError::violation("leaf index space exhausted"))
}
