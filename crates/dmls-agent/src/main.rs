//! `dmls` binary.
//!
//! # Usage
//!
//! ```bash
//! dmls gen-state alice.state
//! dmls gen-state bob.state
//! dmls use-state bob.state gen-kp > bob.kp
//! dmls use-state alice.state gen-send-group < bob.kp > welcome
//! dmls use-state bob.state process < welcome
//! echo hello | dmls use-state alice.state encrypt > msg
//! dmls use-state bob.state process < msg
//! dmls inspect-messages < msg
//! ```
//!
//! Artifacts go to stdout, diagnostics to stderr.

use std::{
    io::{self, Read, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use dmls_agent::{AgentError, StateCommand, SystemEnv};
use dmls_core::{AgentConfig, SignatureScheme, constants::DEFAULT_KEY_PACKAGE_LIFETIME_SECS};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// DMLS group messaging agent
#[derive(Parser, Debug)]
#[command(name = "dmls")]
#[command(about = "Drive one participant of a DMLS group from persisted state")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Subcommand, Debug)]
enum TopCommand {
    /// Create a new participant state file
    GenState {
        /// State file to create
        file: PathBuf,

        /// Identity signature scheme
        #[arg(long, default_value = "Ed25519")]
        signature_scheme: String,

        /// Prior epochs kept decryptable after a commit
        #[arg(long, default_value_t = 1)]
        retention_epochs: u32,

        /// Validity of issued key packages in seconds
        #[arg(long, default_value_t = DEFAULT_KEY_PACKAGE_LIFETIME_SECS)]
        key_package_lifetime_secs: u64,
    },

    /// Operate on an existing state file
    UseState {
        /// State file
        file: PathBuf,

        #[command(subcommand)]
        op: StateOp,
    },

    /// Summarize frames from stdin without any state
    InspectMessages,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum StateOp {
    /// Issue key packages to stdout
    GenKp {
        /// Number of key packages
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Create a group with the key packages on stdin; welcomes to stdout
    GenSendGroup,
    /// Encrypt stdin as application messages
    Encrypt {
        /// Encrypt each line as its own message
        #[arg(long)]
        lines: bool,
    },
    /// Process frames from stdin; plaintexts to stdout
    Process {
        /// Exit non-zero if any item fails
        #[arg(long)]
        strict: bool,
    },
    /// Propose fresh key material for our leaf
    Update,
    /// Propose adding the owners of the key packages on stdin
    Add,
    /// Propose removing a member
    Remove {
        /// Leaf index of the member
        #[arg(long)]
        leaf: u32,
    },
    /// Commit pending proposals; commit and welcomes to stdout
    Commit,
    /// Print a human-readable summary of the state
    Show,
}

impl From<StateOp> for StateCommand {
    fn from(op: StateOp) -> Self {
        match op {
            StateOp::GenKp { count } => Self::GenKeyPackages { count },
            StateOp::GenSendGroup => Self::GenSendGroup,
            StateOp::Encrypt { lines } => Self::Encrypt { lines },
            StateOp::Process { strict } => Self::Process { strict },
            StateOp::Update => Self::Update,
            StateOp::Add => Self::Add,
            StateOp::Remove { leaf } => Self::Remove { leaf },
            StateOp::Commit => Self::Commit,
            StateOp::Show => Self::Show,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            let _ = writeln!(io::stderr().lock(), "dmls: {err}");
            ExitCode::FAILURE
        },
    }
}

fn run(command: TopCommand) -> Result<(), AgentError> {
    let mut stdout = io::stdout().lock();

    match command {
        TopCommand::GenState { file, signature_scheme, retention_epochs, key_package_lifetime_secs } => {
            let config = AgentConfig {
                signature_scheme: signature_scheme.parse::<SignatureScheme>()?,
                retention_epochs,
                key_package_lifetime_secs,
            };
            dmls_agent::gen_state(&file, config, &SystemEnv::new())
        },
        TopCommand::UseState { file, op } => {
            let command = StateCommand::from(op);
            let input = if command.reads_input() { read_stdin()? } else { Vec::new() };
            dmls_agent::use_state(&file, command, &input, &mut stdout, SystemEnv::new())?;
            stdout.flush().map_err(|source| AgentError::Io { context: "flushing stdout".to_string(), source })
        },
        TopCommand::InspectMessages => {
            let input = read_stdin()?;
            let complete = dmls_agent::inspect_messages(&input, &mut stdout)?;
            if !complete {
                tracing::warn!("input ended with an unparseable frame");
            }
            Ok(())
        },
    }
}

fn read_stdin() -> Result<Vec<u8>, AgentError> {
    let mut input = Vec::new();
    io::stdin()
        .lock()
        .read_to_end(&mut input)
        .map_err(|source| AgentError::Io { context: "reading stdin".to_string(), source })?;
    Ok(input)
}
