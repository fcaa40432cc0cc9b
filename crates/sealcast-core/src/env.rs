//! Environment abstraction for deterministic testing.
//!
//! Decouples delivery logic from system resources (time, randomness). Enables
//! deterministic simulation (virtual clock, seeded RNG) and production use
//! with real system resources.

use std::time::Duration;

/// Abstract environment providing time, randomness, and sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `wall_clock_millis()` never goes backwards within one process
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    ///
    /// Used for epoch age, message timestamps and pending-delivery records.
    fn wall_clock_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait. Retry backoff is the only
    /// caller.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random array.
    ///
    /// Convenience for fixed-size key material and nonce suffixes.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
