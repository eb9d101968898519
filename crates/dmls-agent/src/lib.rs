//! DMLS Agent
//!
//! Filesystem and I/O shell around [`dmls_core`]. Every invocation loads one
//! participant's snapshot, runs a single [`Command`] and persists the result
//! only if the command succeeded:
//!
//! ```text
//! load(state file) ──► Agent::execute ──► Ok  ──► write artifacts, store(state file)
//!                                    └──► Err ──► state file untouched
//! ```
//!
//! The `dmls` binary is a thin clap front end over [`gen_state`],
//! [`use_state`] and [`inspect_messages`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod state_file;
pub mod system_env;

use std::{io::Write, path::Path};

use dmls_core::{Agent, AgentConfig, AgentState, Command, Environment, ItemReport, Outcome, Output};
use tracing::{info, warn};

pub use crate::{error::AgentError, system_env::SystemEnv};

/// Operations on an existing state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCommand {
    /// Issue key packages
    GenKeyPackages {
        /// How many
        count: usize,
    },
    /// Create a group from the key packages on input
    GenSendGroup,
    /// Encrypt input as application messages
    Encrypt {
        /// One message per line instead of one for all input
        lines: bool,
    },
    /// Process the frames on input
    Process {
        /// Fail the invocation when any item fails
        strict: bool,
    },
    /// Propose an update of our leaf
    Update,
    /// Propose adding the owners of the key packages on input
    Add,
    /// Propose removing a leaf
    Remove {
        /// Leaf index
        leaf: u32,
    },
    /// Commit pending proposals
    Commit,
    /// Print a summary of the state
    Show,
}

impl StateCommand {
    /// Whether the command consumes standard input.
    pub fn reads_input(self) -> bool {
        matches!(self, Self::GenSendGroup | Self::Encrypt { .. } | Self::Process { .. } | Self::Add)
    }
}

/// Create a new participant at `path`.
///
/// # Errors
///
/// - `StateExists` if `path` already exists
/// - `InvalidConfig` / `KeyExhaustion` from state creation
pub fn gen_state(path: &Path, config: AgentConfig, env: &impl Environment) -> Result<(), AgentError> {
    if path.exists() {
        return Err(AgentError::StateExists(path.to_path_buf()));
    }

    let state = AgentState::create(config, env)?;
    state_file::store(path, &state)?;

    info!(path = %path.display(), member = format_args!("{:016x}", state.identity.member_id()), "created state");
    Ok(())
}

/// Run `command` against the state at `path`, writing artifacts to `out`.
///
/// Frame-producing commands write the concatenated frames. `Process` writes
/// every recovered plaintext followed by a newline. `Show` writes the state
/// summary.
///
/// # Errors
///
/// Any [`AgentError`]. The state file is rewritten only when the command
/// succeeded, or for `Process` when at least one item succeeded.
pub fn use_state<E: Environment>(
    path: &Path,
    command: StateCommand,
    input: &[u8],
    out: &mut impl Write,
    env: E,
) -> Result<(), AgentError> {
    let state = state_file::load(path)?;

    let core_command = match command {
        StateCommand::Show => {
            return write!(out, "{}", state.summary()).map_err(AgentError::io("writing summary"));
        },
        StateCommand::Process { strict } => {
            return process(path, state, input, out, env, strict);
        },
        StateCommand::GenKeyPackages { count } => Command::GenKeyPackages { count },
        StateCommand::GenSendGroup => Command::CreateGroup { key_packages: input.to_vec() },
        StateCommand::Encrypt { lines } => Command::Encrypt { plaintexts: plaintexts(input, lines) },
        StateCommand::Update => Command::Update,
        StateCommand::Add => Command::Add { key_packages: input.to_vec() },
        StateCommand::Remove { leaf } => Command::Remove { leaf },
        StateCommand::Commit => Command::Commit,
    };

    let mut agent = Agent::new(state, env);
    let Output::Frames(frames) = agent.execute(core_command)? else {
        unreachable!("only Process yields reports")
    };

    // Persist before releasing artifacts: a frame whose secrets were never
    // stored would be unusable to us later.
    state_file::store(path, agent.state())?;
    out.write_all(&frames).map_err(AgentError::io("writing frames"))?;

    info!(?command, bytes = frames.len(), "command complete");
    Ok(())
}

fn process<E: Environment>(
    path: &Path,
    state: AgentState,
    input: &[u8],
    out: &mut impl Write,
    env: E,
    strict: bool,
) -> Result<(), AgentError> {
    let mut agent = Agent::new(state, env);
    let Output::Processed(reports) = agent.execute(Command::Process { stream: input.to_vec() })? else {
        unreachable!("Process yields reports")
    };

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed < reports.len() {
        state_file::store(path, agent.state())?;
    }

    for report in &reports {
        log_report(report);
        if let Outcome::Delivered { plaintext, .. } = &report.outcome {
            out.write_all(plaintext).map_err(AgentError::io("writing plaintext"))?;
            out.write_all(b"\n").map_err(AgentError::io("writing plaintext"))?;
        }
    }

    if strict && failed > 0 {
        return Err(AgentError::ItemsFailed { failed, total: reports.len() });
    }
    Ok(())
}

fn log_report(report: &ItemReport) {
    if report.succeeded() {
        info!("{report}");
    } else {
        warn!("{report}");
    }
}

/// Split input into messages. Without `lines` the whole input is one message.
fn plaintexts(input: &[u8], lines: bool) -> Vec<Vec<u8>> {
    if !lines {
        return vec![input.to_vec()];
    }

    let body = input.strip_suffix(b"\n").unwrap_or(input);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect()
}

/// Write a structural summary of the frames in `input`.
///
/// Never needs state. Returns whether the whole input parsed.
pub fn inspect_messages(input: &[u8], out: &mut impl Write) -> Result<bool, AgentError> {
    let inspection = dmls_core::inspect(input);
    write!(out, "{inspection}").map_err(AgentError::io("writing inspection"))?;
    Ok(inspection.error.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_input_is_one_message() {
        assert_eq!(plaintexts(b"a\nb\n", false), vec![b"a\nb\n".to_vec()]);
        assert_eq!(plaintexts(b"", false), vec![Vec::new()]);
    }

    #[test]
    fn lines_split_on_newline() {
        assert_eq!(plaintexts(b"a\nb\n", true), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(plaintexts(b"a\r\nb", true), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(plaintexts(b"a\n\nb\n", true), vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }

    #[test]
    fn empty_input_has_no_lines() {
        assert!(plaintexts(b"", true).is_empty());
        assert!(plaintexts(b"\n", true).is_empty());
    }

    #[test]
    fn only_input_commands_read_stdin() {
        assert!(StateCommand::Process { strict: false }.reads_input());
        assert!(StateCommand::Add.reads_input());
        assert!(!StateCommand::Commit.reads_input());
        assert!(!StateCommand::Show.reads_input());
    }
}
