//! Production Environment implementation using system time and RNG.
//!
//! - Real wall clock (`SystemTime`)
//! - OS cryptographic RNG (getrandom). Truly random, not reproducible
//! - Tokio async sleep for actual wall-clock delays

use std::time::Duration;

use crate::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A sender without functioning cryptographic
/// randomness cannot create epochs or nonces safely, and RNG failure
/// indicates OS-level issues.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot create key material");
    }
}
