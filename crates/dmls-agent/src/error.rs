//! Agent error type.

use std::{io, path::PathBuf};

use dmls_core::DmlsError;
use thiserror::Error;

/// Errors from one agent invocation.
///
/// Every variant maps to exit code 1. Argument errors never get here; clap
/// reports them itself with exit code 2.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The protocol operation failed. Nothing was written.
    #[error(transparent)]
    Dmls(#[from] DmlsError),

    /// Reading input, writing output or touching the state file failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// `gen-state` refuses to replace an existing participant.
    #[error("state file {} already exists", .0.display())]
    StateExists(PathBuf),

    /// `process --strict` saw failing items. Successful items were still
    /// applied and persisted.
    #[error("{failed} of {total} items failed")]
    ItemsFailed {
        /// Items that failed
        failed: usize,
        /// Items in the stream
        total: usize,
    },
}

impl AgentError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}
