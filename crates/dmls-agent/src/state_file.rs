//! On-disk state snapshots.
//!
//! A snapshot is replaced atomically: the new bytes go to a temporary file in
//! the same directory, are synced, then renamed over the target. Readers see
//! either the old snapshot or the new one, never a torn write.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use dmls_core::AgentState;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::AgentError;

/// Read and decode the snapshot at `path`.
pub fn load(path: &Path) -> Result<AgentState, AgentError> {
    let bytes = fs::read(path).map_err(AgentError::io(format!("reading {}", path.display())))?;
    let state = AgentState::load(&bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "loaded state");
    Ok(state)
}

/// Encode `state` and atomically replace the file at `path`.
pub fn store(path: &Path, state: &AgentState) -> Result<(), AgentError> {
    let bytes = state.store()?;
    let context = || format!("writing {}", path.display());

    let mut tmp = NamedTempFile::new_in(parent_dir(path)).map_err(AgentError::io(context()))?;
    tmp.write_all(&bytes).map_err(AgentError::io(context()))?;
    tmp.as_file().sync_all().map_err(AgentError::io(context()))?;
    tmp.persist(path).map_err(|e| AgentError::io(context())(e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "stored state");
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
