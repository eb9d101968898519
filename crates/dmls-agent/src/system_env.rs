//! Production environment: OS entropy and the system clock.
//!
//! Not reproducible. Tests use [`dmls_core::SeededEnv`] instead.

use std::time::{SystemTime, UNIX_EPOCH};

use dmls_core::{EntropyError, Environment};

/// Environment backed by `getrandom` and `SystemTime`.
///
/// # Security
///
/// getrandom reads the OS CSPRNG (`getrandom(2)` on Linux,
/// `BCryptGenRandom` on Windows). A failure is reported as an
/// [`EntropyError`], which the core surfaces as `KeyExhaustion`; the
/// operation aborts before any state is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|e| EntropyError { reason: e.to_string() })
    }

    fn unix_time_secs(&self) -> u64 {
        // A clock before 1970 reads as 0, which only makes fresh key packages
        // look not-yet-valid to peers.
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
    }
}
