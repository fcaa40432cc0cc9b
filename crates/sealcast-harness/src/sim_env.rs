//! Simulated environment: virtual clock and seeded randomness.
//!
//! Sleeping never blocks. It advances the virtual clock by the requested
//! duration and records it, so tests can assert on backoff schedules
//! without waiting.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealcast_core::Environment;

/// Virtual clock start, an arbitrary fixed wall-clock time.
pub const SIM_EPOCH_MS: u64 = 1_700_000_000_000;

/// Deterministic [`Environment`] for simulation.
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    rng: ChaCha20Rng,
    now_ms: u64,
    sleeps: Vec<Duration>,
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose randomness is fully determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                rng: ChaCha20Rng::seed_from_u64(seed),
                now_ms: SIM_EPOCH_MS,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.lock().now_ms += duration.as_millis() as u64;
    }

    /// Every sleep so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn wall_clock_millis(&self) -> u64 {
        self.lock().now_ms
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let mut state = self.lock();
        state.now_ms += duration.as_millis() as u64;
        state.sleeps.push(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}
