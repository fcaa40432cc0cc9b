//! Chaotic storage wrapper for fault injection testing
//!
//! Delegates to an inner storage but fails write transactions, either with a
//! seeded probability or at chosen positions. A failed write never reaches
//! the inner storage, which is exactly what a rollback looks like to the
//! caller. Reads always pass through.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use super::{ReadTxn, Storage, StorageError, WriteTxn};

/// Storage wrapper that injects write failures.
///
/// Clones share the RNG and the write counter, so a test can keep one handle
/// and give another to the code under test.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    state: Arc<Mutex<ChaosState>>,
}

struct ChaosState {
    rng: ChaoticRng,
    /// Write transactions attempted so far
    writes: usize,
    /// 1-based write positions that must fail
    fail_at: BTreeSet<usize>,
}

/// Linear congruential generator, deterministic for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner`, failing writes with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            state: Arc::new(Mutex::new(ChaosState {
                rng: ChaoticRng::new(seed),
                writes: 0,
                fail_at: BTreeSet::new(),
            })),
        }
    }

    /// Additionally fail the `n`th write transaction (1-based, counted from
    /// construction).
    #[must_use]
    pub fn fail_nth_write(self, n: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail_at.insert(n);
        }
        self
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Write transactions attempted so far, failed ones included.
    pub fn write_count(&self) -> usize {
        self.state.lock().map_or(0, |state| state.writes)
    }

    fn should_fail_write(&self) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StorageError::Io("chaos state mutex poisoned".into()))?;

        state.writes += 1;
        let scheduled = state.fail_at.contains(&state.writes);
        let random = state.rng.next() < self.failure_rate;
        Ok(scheduled || random)
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<StorageError>,
    {
        self.inner.read(f)
    }

    fn write<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<StorageError>,
    {
        if self.should_fail_write()? {
            return Err(StorageError::Io("chaotic failure injection".to_string()).into());
        }
        self.inner.write(f)
    }
}
