//! Commits: apply pending proposals and advance the epoch.
//!
//! A commit body lists the applied proposals and the commit secret sealed to
//! each remaining member. It is encrypted under the outgoing epoch's
//! handshake key, and its confirmation tag is keyed by the incoming epoch, so
//! a receiver that derives different secrets fails closed.

use dmls_crypto::{EpochSecrets, SealedBox, next_epoch_secret, open, seal};
use dmls_proto::{
    Frame, Opcode, Payload,
    payloads::{from_cbor, mls::CommitData, to_cbor},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{
    GroupEvent, GroupState, group_context,
    proposal::{Applied, ProposalOrRef},
};
use crate::{
    codec,
    constants::MAX_EPOCH,
    env::Environment,
    error::{DmlsError, Result},
    identity::{Identity, KeyStore, Secret32},
};

/// Commit secret sealed to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SealedSecret {
    leaf: u32,
    sealed: SealedBox,
}

/// Plaintext of a commit's ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CommitContent {
    proposals: Vec<ProposalOrRef>,
    sealed_secrets: Vec<SealedSecret>,
}

/// Frames produced by our own commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutput {
    /// The commit, for every current member
    pub commit: Frame,
    /// One Welcome per member added by this commit
    pub welcomes: Vec<Frame>,
}

impl GroupState {
    /// Commit every pending proposal and advance to the next epoch.
    ///
    /// An empty commit is allowed: it still rotates the epoch secret with a
    /// fresh commit secret.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if a pending proposal cannot be applied or the
    ///   epoch limit is reached
    /// - `KeyExhaustion` if the environment has no entropy
    pub fn commit(
        &mut self,
        identity: &Identity,
        key_store: &mut KeyStore,
        env: &impl Environment,
    ) -> Result<CommitOutput> {
        let new_epoch = self.next_epoch()?;

        let (proposals, listed) = self.pending_for_commit();
        let applied = self.apply_proposals(proposals, self.own_leaf, key_store)?;
        let own_secret = self.own_update_secret(&applied)?;

        let context = group_context(self.group_id, new_epoch, &applied.members);
        let commit_secret = Secret32::random(env)?;

        let mut sealed_secrets = Vec::new();
        for member in &applied.members {
            // joiners get the epoch secret from their Welcome
            if member.leaf == self.own_leaf || member.leaf >= self.next_leaf {
                continue;
            }
            let sealed = seal(
                &member.encryption_key,
                env.random_array()?,
                env.random_array()?,
                &context,
                commit_secret.expose(),
            )?;
            sealed_secrets.push(SealedSecret { leaf: member.leaf, sealed });
        }

        let content = CommitContent { proposals: listed, sealed_secrets };
        let body = to_cbor(&content)?;

        let header = self.header(Opcode::Commit);
        let (nonce, ciphertext) = codec::seal_handshake(self.secrets.handshake_key(), &header, &body, env)?;

        let secrets = self.next_secrets(&applied, commit_secret.expose(), &context);
        let confirmation_tag = secrets.confirmation_tag(&Sha256::digest(&body));

        let commit = codec::sign_frame(
            identity,
            header,
            Payload::Commit(CommitData { nonce, ciphertext, confirmation_tag, signature: Vec::new() }),
        )?;

        let added = applied.added.clone();
        self.install(applied, own_secret, new_epoch, secrets);

        let welcomes = added
            .iter()
            .map(|(key_package, reference)| self.welcome_for(identity, key_package, *reference, env))
            .collect::<Result<Vec<_>>>()?;

        info!(epoch = new_epoch, welcomes = welcomes.len(), "committed");
        Ok(CommitOutput { commit, welcomes })
    }

    /// Apply a commit from another member.
    ///
    /// # Errors
    ///
    /// - `EpochMismatch` if the commit was made in another epoch
    /// - `AuthenticationFailure` if the signature, AEAD tag, sealed secret or
    ///   confirmation tag fails
    /// - `ProtocolViolation` if the commit is invalid for this group
    pub fn process_commit(&mut self, frame: &Frame, key_store: &mut KeyStore) -> Result<GroupEvent> {
        let header = &frame.header;
        self.check_group(header.group_id())?;

        let committer = header.sender_index();
        let epoch = header.epoch();

        if epoch != self.epoch {
            if committer == self.own_leaf && epoch.checked_add(1) == Some(self.epoch) {
                return Ok(GroupEvent::Ignored { reason: "own commit already applied" });
            }
            return Err(DmlsError::EpochMismatch { expected: self.epoch, actual: epoch });
        }

        if committer == self.own_leaf {
            return Err(DmlsError::violation("commit from our own leaf that we never applied"));
        }

        let signature_key = self
            .member(committer)
            .map(|m| m.signature_key)
            .ok_or_else(|| DmlsError::violation(format!("commit from non-member leaf {committer}")))?;

        let Payload::Commit(data) = Payload::from_frame(frame)? else {
            return Err(DmlsError::malformed("expected commit payload"));
        };
        codec::verify_frame(&signature_key, header, &Payload::Commit(data.clone()))?;

        let body = codec::open_handshake(self.secrets.handshake_key(), header, &data.nonce, &data.ciphertext)?;
        let content: CommitContent = from_cbor(&body)?;

        let new_epoch = self.next_epoch()?;
        let proposals = self.resolve_proposals(content.proposals, committer)?;
        let applied = self.apply_proposals(proposals, committer, key_store)?;

        if applied.removed.contains(&self.own_leaf) {
            info!(epoch, committer, "removed from group");
            return Ok(GroupEvent::Removed { epoch });
        }

        let own_secret = self.own_update_secret(&applied)?;
        let context = group_context(self.group_id, new_epoch, &applied.members);

        let sealed = content
            .sealed_secrets
            .iter()
            .find(|s| s.leaf == self.own_leaf)
            .ok_or_else(|| DmlsError::violation("commit carries no secret for our leaf"))?;
        let opening_key = own_secret.as_ref().unwrap_or(&self.own_encryption_secret);
        let commit_secret: [u8; 32] = open(opening_key.expose(), &sealed.sealed, &context)?
            .try_into()
            .map_err(|_| DmlsError::malformed("commit secret is not 32 bytes"))?;
        let commit_secret = Secret32::new(commit_secret);

        let secrets = self.next_secrets(&applied, commit_secret.expose(), &context);
        if !secrets.verify_confirmation_tag(&Sha256::digest(&body), &data.confirmation_tag) {
            return Err(DmlsError::auth("confirmation tag mismatch"));
        }

        debug!(epoch = new_epoch, committer, proposals = applied.proposals.len(), "applying commit");
        self.install(applied, own_secret, new_epoch, secrets);

        Ok(GroupEvent::Advanced { epoch: new_epoch })
    }

    fn next_epoch(&self) -> Result<u64> {
        self.epoch
            .checked_add(1)
            .filter(|epoch| *epoch <= MAX_EPOCH)
            .ok_or_else(|| DmlsError::violation(format!("epoch limit {MAX_EPOCH} reached")))
    }

    fn next_secrets(&self, applied: &Applied, commit_secret: &[u8; 32], context: &[u8; 32]) -> EpochSecrets {
        let mut ikm = applied.entropy.clone();
        ikm.extend_from_slice(commit_secret);
        EpochSecrets::derive(next_epoch_secret(self.secrets.epoch_secret(), &ikm, context))
    }

    fn install(&mut self, applied: Applied, own_secret: Option<Secret32>, epoch: u64, secrets: EpochSecrets) {
        if let Some(secret) = own_secret {
            self.own_encryption_secret = secret;
        }
        self.members = applied.members;
        self.next_leaf = applied.next_leaf;
        self.advance(epoch, secrets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AgentConfig,
        env::SeededEnv,
        group::{
            proposal::{PendingProposal, Proposal, ProposalRef},
            tests::Participant,
        },
    };

    struct Seat {
        who: Participant,
        group: GroupState,
    }

    impl Seat {
        fn receive(&mut self, commit: &Frame) -> Result<GroupEvent> {
            self.group.process_commit(commit, &mut self.who.key_store)
        }
    }

    /// alice at leaf 0 with bob and carol joined at epoch 0.
    fn trio(env: &SeededEnv) -> [Seat; 3] {
        let config = AgentConfig::default();
        let mut alice = Participant::new(env);
        let mut bob = Participant::new(env);
        let mut carol = Participant::new(env);
        let kps = vec![bob.key_package(env), carol.key_package(env)];

        let (group, welcomes) =
            GroupState::create(&alice.identity, &kps, &mut alice.key_store, &config, env).unwrap();
        let bob_group = GroupState::join(&bob.identity, &welcomes[0], &mut bob.key_store, &config).unwrap();
        let carol_group = GroupState::join(&carol.identity, &welcomes[1], &mut carol.key_store, &config).unwrap();

        [
            Seat { who: alice, group },
            Seat { who: bob, group: bob_group },
            Seat { who: carol, group: carol_group },
        ]
    }

    fn commit(seat: &mut Seat, env: &SeededEnv) -> Frame {
        seat.group.commit(&seat.who.identity, &mut seat.who.key_store, env).unwrap().commit
    }

    /// Re-sign `commit` as `signer` after editing its payload.
    fn resigned(signer: &Seat, commit: &Frame, edit: impl FnOnce(&mut CommitData)) -> Frame {
        let Ok(Payload::Commit(mut data)) = Payload::from_frame(commit) else {
            unreachable!("frame is a commit");
        };
        edit(&mut data);
        codec::sign_frame(&signer.who.identity, commit.header, Payload::Commit(data)).unwrap()
    }

    #[test]
    fn proposal_from_another_member_travels_by_reference() {
        let env = SeededEnv::with_seed(1);
        let [mut alice, mut bob, mut carol] = trio(&env);

        let update = bob.group.propose_update(&bob.who.identity, &env).unwrap();
        for seat in [&mut alice, &mut carol] {
            seat.group.process_proposal(&update, &seat.who.key_store, env.unix_time_secs()).unwrap();
        }

        alice.group.propose_update(&alice.who.identity, &env).unwrap();
        let frame = commit(&mut alice, &env);

        assert_eq!(bob.receive(&frame).unwrap(), GroupEvent::Advanced { epoch: 1 });
        assert_eq!(carol.receive(&frame).unwrap(), GroupEvent::Advanced { epoch: 1 });

        // PROPERTY: every member derived the same epoch and the same leaf keys
        assert_eq!(alice.group.epoch_authenticator(), bob.group.epoch_authenticator());
        assert_eq!(alice.group.epoch_authenticator(), carol.group.epoch_authenticator());
        assert_eq!(carol.group.members(), bob.group.members());
    }

    #[test]
    fn commit_cannot_credit_an_update_to_another_member() {
        let env = SeededEnv::with_seed(2);
        let [mut alice, mut bob, mut carol] = trio(&env);
        let bob_key = carol.group.member(1).unwrap().encryption_key;

        alice.group.pending.push(PendingProposal {
            sender: 1,
            proposal: Proposal::Update { encryption_key: [9; 32], entropy: [9; 32] },
            reference: ProposalRef([9; 32]),
            local_secret: None,
        });
        let frame = commit(&mut alice, &env);

        // INVARIANT: only proposals we verified under their sender's key apply
        for seat in [&mut bob, &mut carol] {
            let before = seat.group.clone();
            let err = seat.receive(&frame).unwrap_err();
            assert_eq!(err.code(), "protocol_violation");
            assert_eq!(seat.group, before);
        }
        assert_eq!(carol.group.member(1).unwrap().encryption_key, bob_key);
    }

    #[test]
    fn reference_to_unseen_proposal_is_rejected() {
        let env = SeededEnv::with_seed(3);
        let [mut alice, mut bob, mut carol] = trio(&env);

        let update = bob.group.propose_update(&bob.who.identity, &env).unwrap();
        alice.group.process_proposal(&update, &alice.who.key_store, env.unix_time_secs()).unwrap();
        let frame = commit(&mut alice, &env);

        assert_eq!(bob.receive(&frame).unwrap(), GroupEvent::Advanced { epoch: 1 });
        assert_eq!(carol.receive(&frame).unwrap_err().code(), "protocol_violation");
        assert_eq!(carol.group.epoch(), 0);
    }

    #[test]
    fn tampered_commit_fields_fail_authentication() {
        let env = SeededEnv::with_seed(4);
        let [mut alice, mut bob, _carol] = trio(&env);

        alice.group.propose_update(&alice.who.identity, &env).unwrap();
        let frame = commit(&mut alice, &env);

        let forgeries = [
            resigned(&alice, &frame, |data| data.confirmation_tag[0] ^= 0x01),
            resigned(&alice, &frame, |data| data.ciphertext[0] ^= 0x01),
            resigned(&bob, &frame, |_| {}),
        ];

        let before = bob.group.clone();
        for forged in &forgeries {
            let err = bob.receive(forged).unwrap_err();
            assert!(matches!(err, DmlsError::AuthenticationFailure { .. }), "{err:?}");
            assert_eq!(bob.group, before);
        }

        assert_eq!(bob.receive(&frame).unwrap(), GroupEvent::Advanced { epoch: 1 });
        assert_eq!(alice.group.epoch_authenticator(), bob.group.epoch_authenticator());
    }
}
