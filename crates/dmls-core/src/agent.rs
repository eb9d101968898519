//! Agent orchestrator.
//!
//! Maps one external [`Command`] onto the key package factory, the group
//! engine and the codec. Every command runs against a copy of the state; the
//! copy replaces the held state only when the command succeeds, so a failure
//! leaves nothing half-applied.
//!
//! `Process` is the exception to all-or-nothing: each frame in the stream is
//! applied to its own copy and kept or discarded on its own, and every item
//! gets an [`ItemReport`].
//!
//! A joiner is usually handed a committer's whole output: the commit followed
//! by the welcomes. While we have no group, a commit whose successor epoch is
//! welcomed later in the same stream is reported as ignored, not failed.

use std::{collections::BTreeSet, fmt};

use dmls_proto::{Frame, FrameReader, Opcode, payloads::mls::ProposalKind};
use tracing::{info, warn};

use crate::{
    codec,
    env::Environment,
    error::{DmlsError, Result},
    group::{GroupEvent, GroupState},
    key_package,
    state::AgentState,
};

/// One operation, carrying its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Issue `count` key packages
    GenKeyPackages {
        /// How many to issue
        count: usize,
    },

    /// Create a group with the owners of the given key packages
    CreateGroup {
        /// Concatenated key package frames
        key_packages: Vec<u8>,
    },

    /// Encrypt each plaintext as one application message
    Encrypt {
        /// Messages in send order
        plaintexts: Vec<Vec<u8>>,
    },

    /// Process a stream of inbound frames
    Process {
        /// Concatenated frames
        stream: Vec<u8>,
    },

    /// Propose fresh key material for our leaf
    Update,

    /// Propose adding the owners of the given key packages
    Add {
        /// Concatenated key package frames
        key_packages: Vec<u8>,
    },

    /// Propose removing a member
    Remove {
        /// Leaf to remove
        leaf: u32,
    },

    /// Commit pending proposals
    Commit,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Concatenated frames to hand to other participants
    Frames(Vec<u8>),
    /// Per-item results of `Process`
    Processed(Vec<ItemReport>),
}

/// Result of one item in a processed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// Position in the stream
    pub index: usize,
    /// Frame type, when the header parsed
    pub kind: Option<Opcode>,
    /// What happened
    pub outcome: Outcome,
}

impl ItemReport {
    /// Whether the item was handled without error.
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed(_))
    }
}

impl fmt::Display for ItemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.map_or("frame", Opcode::name);
        write!(f, "#{} {kind}: {}", self.index, self.outcome)
    }
}

/// Per-item outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Application message decrypted
    Delivered {
        /// Sender leaf
        sender: u32,
        /// Plaintext
        plaintext: Vec<u8>,
    },
    /// Proposal held for the next commit
    Queued {
        /// Proposer leaf
        sender: u32,
        /// Proposal type
        kind: ProposalKind,
    },
    /// Commit applied
    Applied {
        /// New epoch
        epoch: u64,
    },
    /// Joined a group from a Welcome
    Joined {
        /// Group id
        group_id: u128,
        /// Epoch joined at
        epoch: u64,
    },
    /// Nothing to do (own artifact or duplicate)
    Ignored {
        /// Why
        reason: &'static str,
    },
    /// A commit removed us; the group was dropped
    Removed,
    /// The item failed and had no effect
    Failed(DmlsError),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered { sender, plaintext } => {
                write!(f, "delivered {} bytes from leaf {sender}", plaintext.len())
            },
            Self::Queued { sender, kind } => write!(f, "queued {kind:?} from leaf {sender}"),
            Self::Applied { epoch } => write!(f, "applied, now at epoch {epoch}"),
            Self::Joined { group_id, epoch } => write!(f, "joined group {group_id:032x} at epoch {epoch}"),
            Self::Ignored { reason } => write!(f, "ignored ({reason})"),
            Self::Removed => f.write_str("removed from group"),
            Self::Failed(err) => write!(f, "failed [{}]: {err}", err.code()),
        }
    }
}

impl From<GroupEvent> for Outcome {
    fn from(event: GroupEvent) -> Self {
        match event {
            GroupEvent::Delivered { sender, plaintext } => Self::Delivered { sender, plaintext },
            GroupEvent::Queued { sender, kind } => Self::Queued { sender, kind },
            GroupEvent::Advanced { epoch } => Self::Applied { epoch },
            GroupEvent::Ignored { reason } => Self::Ignored { reason },
            GroupEvent::Removed { .. } => Self::Removed,
        }
    }
}

/// Runs commands against one participant's state.
#[derive(Debug)]
pub struct Agent<E: Environment> {
    state: AgentState,
    env: E,
}

impl<E: Environment> Agent<E> {
    /// Wrap a loaded state.
    pub fn new(state: AgentState, env: E) -> Self {
        Self { state, env }
    }

    /// Current state.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Give back the state for persisting.
    pub fn into_state(self) -> AgentState {
        self.state
    }

    /// Run one command.
    ///
    /// # Errors
    ///
    /// Any [`DmlsError`] from the operation. The held state is unchanged
    /// when an error is returned.
    pub fn execute(&mut self, command: Command) -> Result<Output> {
        let mut next = self.state.clone();
        let frames = match command {
            Command::Process { stream } => return Ok(Output::Processed(self.process(&stream))),
            Command::GenKeyPackages { count } => gen_key_packages(&mut next, count, &self.env)?,
            Command::CreateGroup { key_packages } => create_group(&mut next, &key_packages, &self.env)?,
            Command::Encrypt { plaintexts } => encrypt(&mut next, &plaintexts, &self.env)?,
            Command::Update => {
                let AgentState { identity, group, .. } = &mut next;
                vec![require(group)?.propose_update(identity, &self.env)?]
            },
            Command::Add { key_packages } => add(&mut next, &key_packages, &self.env)?,
            Command::Remove { leaf } => {
                let AgentState { identity, group, .. } = &mut next;
                vec![require(group)?.propose_remove(identity, leaf, &self.env)?]
            },
            Command::Commit => {
                let AgentState { identity, key_store, group, .. } = &mut next;
                let output = require(group)?.commit(identity, key_store, &self.env)?;
                std::iter::once(output.commit).chain(output.welcomes).collect()
            },
        };

        let bytes = concat(&frames)?;
        self.state = next;
        Ok(Output::Frames(bytes))
    }

    fn process(&mut self, stream: &[u8]) -> Vec<ItemReport> {
        let mut reports = Vec::new();
        let welcomed = welcomed_commits(stream);

        for (index, frame) in FrameReader::new(stream).enumerate() {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    let err = DmlsError::from(err);
                    warn!(index, code = err.code(), "stream framing failed: {err}");
                    reports.push(ItemReport { index, kind: None, outcome: Outcome::Failed(err) });
                    break;
                },
            };

            let kind = frame.header.opcode_enum();
            if kind == Some(Opcode::Commit)
                && self.state.group.is_none()
                && welcomed.contains(&(frame.header.group_id(), frame.header.epoch()))
            {
                let outcome = Outcome::Ignored { reason: "commit superseded by a welcome in this stream" };
                info!(index, "{outcome}");
                reports.push(ItemReport { index, kind, outcome });
                continue;
            }

            let mut trial = self.state.clone();
            let outcome = match process_frame(&mut trial, &frame, &self.env) {
                Ok(outcome) => {
                    self.state = trial;
                    outcome
                },
                Err(err) => {
                    warn!(index, code = err.code(), "item failed: {err}");
                    Outcome::Failed(err)
                },
            };

            reports.push(ItemReport { index, kind, outcome });
        }

        reports
    }
}

/// `(group, epoch)` of every commit that a Welcome in `stream` follows.
fn welcomed_commits(stream: &[u8]) -> BTreeSet<(u128, u64)> {
    FrameReader::new(stream)
        .map_while(std::result::Result::ok)
        .filter(|frame| frame.header.opcode_enum() == Some(Opcode::Welcome))
        .filter_map(|frame| Some((frame.header.group_id(), frame.header.epoch().checked_sub(1)?)))
        .collect()
}

fn require(group: &mut Option<GroupState>) -> Result<&mut GroupState> {
    group.as_mut().ok_or_else(|| DmlsError::violation("not a member of any group"))
}

fn concat(frames: &[Frame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for frame in frames {
        frame.encode(&mut out)?;
    }
    Ok(out)
}

fn gen_key_packages(state: &mut AgentState, count: usize, env: &impl Environment) -> Result<Vec<Frame>> {
    if count == 0 {
        return Err(DmlsError::InvalidConfig { reason: "key package count must be positive".to_string() });
    }

    let pruned = state.key_store.prune_expired(env.unix_time_secs());
    if pruned > 0 {
        info!(pruned, "dropped expired key package secrets");
    }

    (0..count)
        .map(|_| key_package::issue(&state.identity, &mut state.key_store, &state.config, env))
        .collect()
}

fn create_group(state: &mut AgentState, stream: &[u8], env: &impl Environment) -> Result<Vec<Frame>> {
    if state.group.is_some() {
        return Err(DmlsError::violation("already a member of a group"));
    }

    let key_packages = key_package::verify_all(stream, env.unix_time_secs())?;
    let (group, welcomes) =
        GroupState::create(&state.identity, &key_packages, &mut state.key_store, &state.config, env)?;
    state.group = Some(group);

    Ok(welcomes)
}

fn encrypt(state: &mut AgentState, plaintexts: &[Vec<u8>], env: &impl Environment) -> Result<Vec<Frame>> {
    let AgentState { identity, group, .. } = state;
    let group = require(group)?;

    plaintexts.iter().map(|plaintext| codec::encrypt(group, identity, plaintext, env)).collect()
}

fn add(state: &mut AgentState, stream: &[u8], env: &impl Environment) -> Result<Vec<Frame>> {
    let key_packages = key_package::verify_all(stream, env.unix_time_secs())?;
    if key_packages.is_empty() {
        return Err(DmlsError::violation("no key packages to add"));
    }

    let AgentState { identity, key_store, group, .. } = state;
    let group = require(group)?;

    key_packages
        .into_iter()
        .map(|kp| group.propose_add(identity, kp, key_store, env))
        .collect()
}

fn process_frame(state: &mut AgentState, frame: &Frame, env: &impl Environment) -> Result<Outcome> {
    let opcode = frame
        .header
        .opcode_enum()
        .ok_or_else(|| DmlsError::malformed(format!("unknown opcode {:#06x}", frame.header.opcode())))?;

    let AgentState { config, identity, key_store, group, .. } = state;

    match opcode {
        Opcode::KeyPackage => Err(DmlsError::violation("key packages are consumed by create or add")),
        Opcode::Welcome => {
            if let Some(existing) = group {
                if existing.group_id() == frame.header.group_id() {
                    return Ok(Outcome::Ignored { reason: "already in this group" });
                }
                return Err(DmlsError::violation("already a member of another group"));
            }

            let joined = GroupState::join(identity, frame, key_store, config)?;
            let outcome = Outcome::Joined { group_id: joined.group_id(), epoch: joined.epoch() };
            *group = Some(joined);
            Ok(outcome)
        },
        Opcode::Proposal => {
            let event = require(group)?.process_proposal(frame, key_store, env.unix_time_secs())?;
            Ok(event.into())
        },
        Opcode::Commit => {
            let event = require(group)?.process_commit(frame, key_store)?;
            if matches!(event, GroupEvent::Removed { .. }) {
                *group = None;
            }
            Ok(event.into())
        },
        Opcode::AppMessage => Ok(codec::decrypt(require(group)?, frame)?.into()),
    }
}
