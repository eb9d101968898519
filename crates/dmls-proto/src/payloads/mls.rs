//! Handshake payload types: key packages, proposals, commits, welcomes.
//!
//! These structs carry public key material, handshake ciphertexts and
//! signatures. Proposal and commit bodies are encrypted under the epoch's
//! handshake key by the group layer, so only members of that epoch can read
//! them; the structs here are opaque envelopes.

use serde::{Deserialize, Serialize};

/// Signed single-use join offer
///
/// # Protocol Flow
///
/// 1. A prospective member issues a key package and hands it to a group
///    member out of band.
/// 2. The member adds it (at group creation or through an Add proposal) and
///    produces a Welcome sealed to `init_key`.
/// 3. The joiner opens the Welcome with the stored init private key and the
///    key package is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackageData {
    /// Protocol version the issuer speaks
    pub protocol_version: u8,

    /// Cipher suite identifier
    pub cipher_suite: u16,

    /// Stable identifier derived from the signature key
    pub member_id: u64,

    /// Ed25519 verifying key of the issuer
    pub signature_key: [u8; 32],

    /// X25519 key the Welcome is sealed to
    pub init_key: [u8; 32],

    /// X25519 leaf encryption key used for commit secrets once joined
    pub encryption_key: [u8; 32],

    /// Validity window
    pub lifetime: Lifetime,

    /// Supported protocol features
    pub capabilities: Capabilities,

    /// Ed25519 signature over the header signing data and this struct with
    /// an empty signature
    pub signature: Vec<u8>,
}

/// Validity window of a key package, in unix seconds (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    /// First second the key package may be used
    pub not_before: u64,
    /// Last second the key package may be used
    pub not_after: u64,
}

impl Lifetime {
    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

/// Protocol features advertised by a key package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supported protocol versions
    pub versions: Vec<u8>,
    /// Supported cipher suites
    pub cipher_suites: Vec<u16>,
    /// Supported proposal kinds
    pub proposals: Vec<ProposalKind>,
}

/// Kind of proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProposalKind {
    /// Add a new member
    Add,
    /// Remove an existing member
    Remove,
    /// Refresh the proposer's own leaf key material
    Update,
}

/// Encrypted proposal
///
/// Proposals do not take effect on their own. Every member that processes
/// one holds it pending until a commit for the same epoch applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalData {
    /// `XChaCha20` nonce (24 bytes)
    pub nonce: [u8; 24],

    /// Handshake-key ciphertext of the proposal body
    pub ciphertext: Vec<u8>,

    /// Ed25519 signature of the sender
    pub signature: Vec<u8>,
}

/// Encrypted commit
///
/// # Protocol Flow
///
/// 1. A member collects the pending proposals and encrypts the commit body
///    under the current epoch's handshake key.
/// 2. Every other member decrypts it, applies the same proposals in the same
///    order, and derives the next epoch secret.
/// 3. The confirmation tag proves all members arrived at the same secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    /// `XChaCha20` nonce (24 bytes)
    pub nonce: [u8; 24],

    /// Handshake-key ciphertext of the commit body
    pub ciphertext: Vec<u8>,

    /// HMAC over the commit body under the new epoch's confirmation key
    pub confirmation_tag: [u8; 32],

    /// Ed25519 signature of the committer
    pub signature: Vec<u8>,
}

/// Welcome for one newly added member
///
/// The group secrets are sealed to the init key of the key package
/// identified by `key_package_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeData {
    /// SHA-256 reference of the consumed key package
    pub key_package_ref: [u8; 32],

    /// Sender's ephemeral X25519 public key
    pub ephemeral_key: [u8; 32],

    /// `XChaCha20` nonce (24 bytes)
    pub nonce: [u8; 24],

    /// Sealed group secrets
    pub ciphertext: Vec<u8>,

    /// Ed25519 signature of the adding member
    pub signature: Vec<u8>,
}
