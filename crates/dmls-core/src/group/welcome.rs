//! Welcomes: bootstrap a new member into the current epoch.

use dmls_crypto::{EpochSecrets, SealedBox, open, seal, x25519_public};
use dmls_proto::{
    Frame, Opcode, Payload,
    payloads::{
        from_cbor,
        mls::{KeyPackageData, WelcomeData},
        to_cbor,
    },
};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroize;

use super::{GroupState, Member};
use crate::{
    codec,
    config::AgentConfig,
    env::Environment,
    error::{DmlsError, Result},
    identity::{Identity, KeyPackageRef, KeyStore},
};

/// Group state sealed to a joiner's init key.
#[derive(Serialize, Deserialize)]
struct GroupSecrets {
    group_id: u128,
    epoch: u64,
    next_leaf: u32,
    members: Vec<Member>,
    epoch_secret: [u8; 32],
}

impl Drop for GroupSecrets {
    fn drop(&mut self) {
        self.epoch_secret.zeroize();
    }
}

impl GroupState {
    /// Welcome for the owner of `key_package`, who must already be a member
    /// of the current epoch.
    pub(crate) fn welcome_for(
        &self,
        identity: &Identity,
        key_package: &KeyPackageData,
        reference: KeyPackageRef,
        env: &impl Environment,
    ) -> Result<Frame> {
        let header = self.header(Opcode::Welcome);

        let secrets = GroupSecrets {
            group_id: self.group_id,
            epoch: self.epoch,
            next_leaf: self.next_leaf,
            members: self.members.clone(),
            epoch_secret: *self.secrets.epoch_secret(),
        };
        let mut plaintext = to_cbor(&secrets)?;

        let sealed = seal(
            &key_package.init_key,
            env.random_array()?,
            env.random_array()?,
            &header.signing_data(),
            &plaintext,
        );
        plaintext.zeroize();
        let SealedBox { ephemeral_key, nonce, ciphertext } = sealed?;

        codec::sign_frame(
            identity,
            header,
            Payload::Welcome(WelcomeData {
                key_package_ref: reference.0,
                ephemeral_key,
                nonce,
                ciphertext,
                signature: Vec::new(),
            }),
        )
    }

    /// Join a group from a Welcome addressed to one of our key packages.
    ///
    /// Consumes the key package on success.
    ///
    /// # Errors
    ///
    /// - `UnknownKeyPackage` if the Welcome names a key package we never
    ///   issued
    /// - `ProtocolViolation` if that key package was already consumed or the
    ///   sealed member list does not contain us
    /// - `AuthenticationFailure` if the sealed secrets or signature fail
    pub fn join(
        identity: &Identity,
        frame: &Frame,
        key_store: &mut KeyStore,
        config: &AgentConfig,
    ) -> Result<Self> {
        let header = &frame.header;
        let Payload::Welcome(data) = Payload::from_frame(frame)? else {
            return Err(DmlsError::malformed("expected welcome payload"));
        };

        let reference = KeyPackageRef(data.key_package_ref);
        let kp_secrets = key_store.get(&reference)?;

        let sealed = SealedBox {
            ephemeral_key: data.ephemeral_key,
            nonce: data.nonce,
            ciphertext: data.ciphertext.clone(),
        };
        let mut plaintext = open(kp_secrets.init_key.expose(), &sealed, &header.signing_data())?;
        let decoded = from_cbor::<GroupSecrets>(&plaintext);
        plaintext.zeroize();
        let group_secrets = decoded?;

        if group_secrets.group_id != header.group_id() || group_secrets.epoch != header.epoch() {
            return Err(DmlsError::violation("welcome header disagrees with sealed group secrets"));
        }

        let sender = header.sender_index();
        let sender_key = group_secrets
            .members
            .iter()
            .find(|m| m.leaf == sender)
            .map(|m| m.signature_key)
            .ok_or_else(|| DmlsError::violation(format!("welcome from non-member leaf {sender}")))?;
        codec::verify_frame(&sender_key, header, &Payload::Welcome(data))?;

        let own_encryption_key = x25519_public(kp_secrets.encryption_key.expose());
        let own_leaf = group_secrets
            .members
            .iter()
            .find(|m| m.signature_key == *identity.verifying_key() && m.encryption_key == own_encryption_key)
            .map(|m| m.leaf)
            .ok_or_else(|| DmlsError::violation("welcome member list does not contain us"))?;

        let kp_secrets = key_store.take(&reference)?;

        let group = Self::from_parts(
            group_secrets.group_id,
            group_secrets.epoch,
            group_secrets.members.clone(),
            group_secrets.next_leaf,
            own_leaf,
            kp_secrets.encryption_key.clone(),
            EpochSecrets::derive(group_secrets.epoch_secret),
            config.retention_epochs,
        );

        info!(
            group_id = %format_args!("{:032x}", group.group_id),
            epoch = group.epoch,
            leaf = own_leaf,
            "joined group"
        );

        Ok(group)
    }
}
