//! Proposals: creation, validation on receipt, and application at commit.

use std::collections::BTreeSet;

use dmls_crypto::x25519_public;
use dmls_proto::{
    Frame, Opcode, Payload,
    payloads::{
        from_cbor,
        mls::{KeyPackageData, ProposalData, ProposalKind},
        to_cbor,
    },
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{GroupEvent, GroupState, Member};
use crate::{
    codec,
    constants::MAX_MEMBERS,
    env::Environment,
    error::{DmlsError, Result},
    identity::{Identity, KeyPackageRef, KeyStore, Secret32},
    key_package::{self, VerifiedKeyPackage},
};

/// A change to the group, applied by the next commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    /// Add the owner of a key package
    Add {
        /// Verified key package of the new member
        key_package: KeyPackageData,
    },

    /// Replace the proposer's leaf encryption key and contribute entropy
    Update {
        /// New X25519 leaf encryption key
        encryption_key: [u8; 32],
        /// Fresh entropy mixed into the next epoch secret
        entropy: [u8; 32],
    },

    /// Remove a member
    Remove {
        /// Leaf to remove
        leaf: u32,
    },
}

impl Proposal {
    /// Wire-level kind.
    pub fn kind(&self) -> ProposalKind {
        match self {
            Self::Add { .. } => ProposalKind::Add,
            Self::Update { .. } => ProposalKind::Update,
            Self::Remove { .. } => ProposalKind::Remove,
        }
    }

    /// Application order within a commit: removes, adds, updates.
    fn rank(&self) -> u8 {
        match self {
            Self::Remove { .. } => 0,
            Self::Add { .. } => 1,
            Self::Update { .. } => 2,
        }
    }
}

/// SHA-256 of a signed proposal frame.
///
/// Commits name other members' proposals by this reference, so a committer
/// can only apply proposals that their senders actually signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalRef(pub [u8; 32]);

impl ProposalRef {
    /// Reference of a proposal frame: header bytes then payload bytes.
    pub fn of(frame: &Frame) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(frame.header.to_bytes());
        hasher.update(&frame.payload);
        Self(hasher.finalize().into())
    }
}

/// A proposal waiting for the next commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingProposal {
    /// Proposer leaf
    pub sender: u32,
    /// The proposal
    pub proposal: Proposal,
    /// Reference of the signed frame that carried it
    pub reference: ProposalRef,
    /// Private key behind our own Update's encryption key
    pub(crate) local_secret: Option<Secret32>,
}

/// How a commit body lists one applied proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ProposalOrRef {
    /// The committer's own proposal, carried in full
    Inline(Proposal),
    /// Another member's proposal, resolved against the receiver's pending set
    Reference(ProposalRef),
}

/// A proposal resolved to its verified sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommittedProposal {
    pub(crate) sender: u32,
    pub(crate) proposal: Proposal,
    pub(crate) reference: Option<ProposalRef>,
}

/// Result of applying a commit's proposals to the current member list.
pub(crate) struct Applied {
    pub(crate) proposals: Vec<CommittedProposal>,
    pub(crate) members: Vec<Member>,
    pub(crate) next_leaf: u32,
    pub(crate) entropy: Vec<u8>,
    pub(crate) added: Vec<(KeyPackageData, KeyPackageRef)>,
    pub(crate) removed: BTreeSet<u32>,
    pub(crate) updated: BTreeSet<u32>,
}

/// Stable sort into application order, then drop updates from leaves the
/// same commit removes.
pub(crate) fn ordered(mut proposals: Vec<CommittedProposal>) -> Vec<CommittedProposal> {
    proposals.sort_by_key(|p| p.proposal.rank());

    let removed: BTreeSet<u32> = proposals
        .iter()
        .filter_map(|p| match p.proposal {
            Proposal::Remove { leaf } => Some(leaf),
            _ => None,
        })
        .collect();

    proposals
        .into_iter()
        .filter(|p| !(matches!(p.proposal, Proposal::Update { .. }) && removed.contains(&p.sender)))
        .collect()
}

impl GroupState {
    /// Propose fresh key material for our own leaf.
    ///
    /// The proposal is also queued locally so our own commit can include it.
    pub fn propose_update(&mut self, identity: &Identity, env: &impl Environment) -> Result<Frame> {
        let secret = Secret32::random(env)?;
        let proposal = Proposal::Update {
            encryption_key: x25519_public(secret.expose()),
            entropy: env.random_array()?,
        };

        self.send_proposal(identity, proposal, Some(secret), env)
    }

    /// Propose adding the owner of `key_package`.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if the key package was consumed before or its
    ///   owner is already a member
    pub fn propose_add(
        &mut self,
        identity: &Identity,
        key_package: VerifiedKeyPackage,
        key_store: &KeyStore,
        env: &impl Environment,
    ) -> Result<Frame> {
        key_store.ensure_unconsumed(&key_package.reference)?;
        self.check_addable(&key_package.data)?;

        self.send_proposal(identity, Proposal::Add { key_package: key_package.data }, None, env)
    }

    /// Propose removing the member at `leaf`.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if `leaf` is our own or not a member
    pub fn propose_remove(&mut self, identity: &Identity, leaf: u32, env: &impl Environment) -> Result<Frame> {
        if leaf == self.own_leaf {
            return Err(DmlsError::violation("cannot propose removing our own leaf"));
        }
        if self.member(leaf).is_none() {
            return Err(DmlsError::violation(format!("leaf {leaf} is not a member")));
        }

        self.send_proposal(identity, Proposal::Remove { leaf }, None, env)
    }

    fn send_proposal(
        &mut self,
        identity: &Identity,
        proposal: Proposal,
        local_secret: Option<Secret32>,
        env: &impl Environment,
    ) -> Result<Frame> {
        let header = self.header(Opcode::Proposal);
        let body = to_cbor(&proposal)?;
        let (nonce, ciphertext) = codec::seal_handshake(self.secrets().handshake_key(), &header, &body, env)?;

        let frame = codec::sign_frame(
            identity,
            header,
            Payload::Proposal(ProposalData { nonce, ciphertext, signature: Vec::new() }),
        )?;

        debug!(epoch = self.epoch, kind = ?proposal.kind(), "queued own proposal");
        let reference = ProposalRef::of(&frame);
        self.pending.push(PendingProposal { sender: self.own_leaf, proposal, reference, local_secret });

        Ok(frame)
    }

    /// Validate an inbound proposal and hold it for the next commit.
    ///
    /// # Errors
    ///
    /// - `EpochMismatch` if the proposal is for another epoch
    /// - `AuthenticationFailure` if the signature or AEAD tag fails
    /// - `ProtocolViolation` if the proposal is invalid for this group
    pub fn process_proposal(&mut self, frame: &Frame, key_store: &KeyStore, now: u64) -> Result<GroupEvent> {
        let header = &frame.header;
        self.check_group(header.group_id())?;

        if header.epoch() != self.epoch {
            return Err(DmlsError::EpochMismatch { expected: self.epoch, actual: header.epoch() });
        }

        let sender = header.sender_index();
        if sender == self.own_leaf {
            return Ok(GroupEvent::Ignored { reason: "own proposal" });
        }

        let signature_key = self
            .member(sender)
            .map(|m| m.signature_key)
            .ok_or_else(|| DmlsError::violation(format!("proposal from non-member leaf {sender}")))?;

        let Payload::Proposal(data) = Payload::from_frame(frame)? else {
            return Err(DmlsError::malformed("expected proposal payload"));
        };
        codec::verify_frame(&signature_key, header, &Payload::Proposal(data.clone()))?;

        let body = codec::open_handshake(self.secrets().handshake_key(), header, &data.nonce, &data.ciphertext)?;
        let proposal: Proposal = from_cbor(&body)?;

        self.validate_proposal(sender, &proposal, key_store, now)?;

        if self.pending.iter().any(|p| p.sender == sender && p.proposal == proposal) {
            return Ok(GroupEvent::Ignored { reason: "duplicate proposal" });
        }

        let kind = proposal.kind();
        debug!(epoch = self.epoch, sender, ?kind, "queued proposal");
        let reference = ProposalRef::of(frame);
        self.pending.push(PendingProposal { sender, proposal, reference, local_secret: None });

        Ok(GroupEvent::Queued { sender, kind })
    }

    fn validate_proposal(&self, sender: u32, proposal: &Proposal, key_store: &KeyStore, now: u64) -> Result<()> {
        match proposal {
            Proposal::Add { key_package } => {
                let reference = key_package::verify_data(key_package)?;
                if !key_package.lifetime.contains(now) {
                    return Err(DmlsError::violation(format!("key package {reference} expired")));
                }
                key_store.ensure_unconsumed(&reference)?;
                self.check_addable(key_package)
            },
            Proposal::Update { .. } => Ok(()),
            Proposal::Remove { leaf } => {
                if *leaf == sender {
                    return Err(DmlsError::violation("member proposed removing itself"));
                }
                if self.member(*leaf).is_none() {
                    return Err(DmlsError::violation(format!("leaf {leaf} is not a member")));
                }
                Ok(())
            },
        }
    }

    fn check_addable(&self, key_package: &KeyPackageData) -> Result<()> {
        if self.members.iter().any(|m| m.signature_key == key_package.signature_key) {
            return Err(DmlsError::violation(format!(
                "{:016x} is already a member",
                key_package.member_id
            )));
        }
        Ok(())
    }

    /// Pending proposals in application order, as our own commit lists them.
    pub(crate) fn pending_for_commit(&self) -> (Vec<CommittedProposal>, Vec<ProposalOrRef>) {
        let resolved = ordered(
            self.pending
                .iter()
                .map(|p| CommittedProposal {
                    sender: p.sender,
                    proposal: p.proposal.clone(),
                    reference: Some(p.reference),
                })
                .collect(),
        );

        let listed = resolved
            .iter()
            .map(|p| match p.reference {
                Some(reference) if p.sender != self.own_leaf => ProposalOrRef::Reference(reference),
                _ => ProposalOrRef::Inline(p.proposal.clone()),
            })
            .collect();

        (resolved, listed)
    }

    /// Resolve a received commit's proposal list.
    ///
    /// Inline proposals are credited to the committer. References must name
    /// a proposal we verified and hold pending.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` for a reference we do not hold
    pub(crate) fn resolve_proposals(
        &self,
        listed: Vec<ProposalOrRef>,
        committer: u32,
    ) -> Result<Vec<CommittedProposal>> {
        listed
            .into_iter()
            .map(|entry| match entry {
                ProposalOrRef::Inline(proposal) => {
                    Ok(CommittedProposal { sender: committer, proposal, reference: None })
                },
                ProposalOrRef::Reference(reference) => self
                    .pending
                    .iter()
                    .find(|p| p.reference == reference)
                    .map(|p| CommittedProposal {
                        sender: p.sender,
                        proposal: p.proposal.clone(),
                        reference: Some(reference),
                    })
                    .ok_or_else(|| DmlsError::violation("commit references a proposal we never verified")),
            })
            .collect()
    }

    pub(crate) fn check_group(&self, group_id: u128) -> Result<()> {
        if group_id != self.group_id {
            return Err(DmlsError::violation(format!("frame for unknown group {group_id:032x}")));
        }
        Ok(())
    }

    /// Apply `proposals` (already ordered) to a copy of the member list.
    ///
    /// Foreign key packages added here are recorded as consumed.
    pub(crate) fn apply_proposals(
        &self,
        proposals: Vec<CommittedProposal>,
        committer: u32,
        key_store: &mut KeyStore,
    ) -> Result<Applied> {
        let proposals = ordered(proposals);

        let mut members = self.members.clone();
        let mut next_leaf = self.next_leaf;
        let mut entropy = Vec::new();
        let mut added = Vec::new();
        let mut removed = BTreeSet::new();
        let mut updated = BTreeSet::new();

        for committed in &proposals {
            if self.member(committed.sender).is_none() {
                return Err(DmlsError::violation(format!(
                    "proposal from non-member leaf {}",
                    committed.sender
                )));
            }

            match &committed.proposal {
                Proposal::Remove { leaf } => {
                    if *leaf == committer {
                        return Err(DmlsError::violation("commit removes its own committer"));
                    }
                    let Some(position) = members.iter().position(|m| m.leaf == *leaf) else {
                        return Err(DmlsError::violation(format!("leaf {leaf} is not a member")));
                    };
                    members.remove(position);
                    removed.insert(*leaf);
                    entropy.extend_from_slice(&Sha256::digest(leaf.to_be_bytes()));
                },
                Proposal::Add { key_package } => {
                    let reference = key_package::verify_data(key_package)?;
                    if members.iter().any(|m| m.signature_key == key_package.signature_key) {
                        return Err(DmlsError::violation(format!(
                            "duplicate member {:016x}",
                            key_package.member_id
                        )));
                    }
                    if members.len() >= MAX_MEMBERS {
                        return Err(DmlsError::violation(format!("group is full ({MAX_MEMBERS} members)")));
                    }
                    key_store.mark_consumed(reference)?;

                    members.push(Member {
                        leaf: next_leaf,
                        member_id: key_package.member_id,
                        signature_key: key_package.signature_key,
                        encryption_key: key_package.encryption_key,
                    });
                    next_leaf = next_leaf
                        .checked_add(1)
                        .ok_or_else(|| DmlsError::violation("leaf index space exhausted"))?;
                    added.push((key_package.clone(), reference));
                    entropy.extend_from_slice(&reference.0);
                },
                Proposal::Update { encryption_key, entropy: fresh } => {
                    let Some(member) = members.iter_mut().find(|m| m.leaf == committed.sender) else {
                        return Err(DmlsError::violation(format!(
                            "update from departed leaf {}",
                            committed.sender
                        )));
                    };
                    member.encryption_key = *encryption_key;
                    updated.insert(committed.sender);
                    entropy.extend_from_slice(fresh);
                },
            }
        }

        Ok(Applied { proposals, members, next_leaf, entropy, added, removed, updated })
    }

    /// Private key behind our pending Update, if the commit applied one.
    pub(crate) fn own_update_secret(&self, applied: &Applied) -> Result<Option<Secret32>> {
        if !applied.updated.contains(&self.own_leaf) {
            return Ok(None);
        }

        // the last update from our leaf decides the final key
        let Some(update) = applied
            .proposals
            .iter()
            .rev()
            .find(|p| p.sender == self.own_leaf && matches!(p.proposal, Proposal::Update { .. }))
        else {
            return Ok(None);
        };

        self.pending
            .iter()
            .filter(|p| p.sender == self.own_leaf && p.proposal == update.proposal)
            .filter(|p| update.reference.is_none_or(|r| r == p.reference))
            .find_map(|p| p.local_secret.clone())
            .map(Some)
            .ok_or_else(|| DmlsError::violation("commit applies an update we have no secret for"))
    }
}
