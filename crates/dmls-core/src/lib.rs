//! DMLS Core
//!
//! Group state machine and message pipeline for a command-driven group
//! messaging agent. Each participant owns an independent [`AgentState`]:
//! identity, key store and at most one [`GroupState`]. Participants converge
//! only through the frames they exchange, and applying the same commit to the
//! same epoch yields bit-identical secrets for everyone.
//!
//! # Components
//!
//! - [`identity`]: long-term identity and the key store of one-time secrets
//! - [`key_package`]: signed, single-use join offers
//! - [`group`]: epoch engine (create, propose, commit, welcome)
//! - [`codec`]: frame signing, application message encryption, inspection
//! - [`agent`]: maps [`Command`]s onto the above
//! - [`env`]: injected entropy and clock
//!
//! Nothing here touches the filesystem. Loading and persisting the state
//! snapshot is the caller's job.
//!
//! # Example
//!
//! ```
//! use dmls_core::{Agent, AgentConfig, AgentState, Command, Output, SeededEnv};
//!
//! let env = SeededEnv::with_seed(42);
//! let state = AgentState::create(AgentConfig::default(), &env).unwrap();
//! let mut agent = Agent::new(state, env);
//!
//! let Output::Frames(key_packages) = agent.execute(Command::GenKeyPackages { count: 2 }).unwrap()
//! else {
//!     unreachable!()
//! };
//! assert!(!key_packages.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod codec;
pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod group;
pub mod identity;
pub mod key_package;
pub mod state;

pub use agent::{Agent, Command, ItemReport, Outcome, Output};
pub use codec::{FrameSummary, Inspection, inspect};
pub use config::{AgentConfig, SignatureScheme};
pub use env::{EntropyError, Environment, SeededEnv};
pub use error::{DmlsError, Result};
pub use group::{CommitOutput, GroupEvent, GroupState, Member, PendingProposal, Proposal, ProposalRef};
pub use identity::{Identity, KeyPackageRef, KeyStore};
pub use key_package::VerifiedKeyPackage;
pub use state::AgentState;
