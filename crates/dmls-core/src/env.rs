//! Environment abstraction for deterministic testing.
//!
//! Every operation that needs fresh secrets or the current time takes an
//! [`Environment`]. Production uses OS entropy and the system clock; tests
//! use [`SeededEnv`] so whole multi-member scenarios replay bit for bit.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

/// The entropy source could not produce bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("entropy source unavailable: {reason}")]
pub struct EntropyError {
    /// What the source reported
    pub reason: String,
}

/// Source of randomness and wall-clock time.
///
/// # Invariants
///
/// - `try_random_bytes()` uses cryptographically secure entropy in
///   production
/// - Given the same seed, a test environment produces the same byte sequence
pub trait Environment {
    /// Fill `buffer` with random bytes.
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;

    /// Current wall-clock time in unix seconds. Used for key package
    /// lifetimes only.
    fn unix_time_secs(&self) -> u64;

    /// Random fixed-size array.
    fn random_array<const N: usize>(&self) -> Result<[u8; N], EntropyError> {
        let mut out = [0u8; N];
        self.try_random_bytes(&mut out)?;
        Ok(out)
    }

    /// Random `u128` (group identifiers).
    fn random_u128(&self) -> Result<u128, EntropyError> {
        Ok(u128::from_be_bytes(self.random_array()?))
    }
}

impl<E: Environment> Environment for &E {
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        (*self).try_random_bytes(buffer)
    }

    fn unix_time_secs(&self) -> u64 {
        (*self).unix_time_secs()
    }
}

/// Deterministic environment: ChaCha20 seeded RNG and a settable clock.
///
/// Clones share the RNG stream, so handing the same env to several
/// participants still yields distinct secrets for each.
#[derive(Clone, Debug)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    now: Arc<AtomicU64>,
}

impl SeededEnv {
    /// Fixed clock used unless overridden (2024-01-01T00:00:00Z).
    pub const DEFAULT_TIME: u64 = 1_704_067_200;

    /// Create an environment with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            now: Arc::new(AtomicU64::new(Self::DEFAULT_TIME)),
        }
    }

    /// Set the clock.
    pub fn set_time(&self, unix_secs: u64) {
        self.now.store(unix_secs, Ordering::SeqCst);
    }
}

impl Environment for SeededEnv {
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        let Ok(mut rng) = self.rng.lock() else {
            return Err(EntropyError { reason: "seeded rng poisoned".to_string() });
        };
        rng.fill_bytes(buffer);
        Ok(())
    }

    fn unix_time_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
