//! Sender configuration.

use std::time::Duration;

/// Tunables for shared-ciphertext delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Largest envelope the server accepts
    pub max_envelope_size: usize,
    /// Fewer eligible recipients than this and the shared path is skipped
    pub min_recipients: usize,
    /// Retries after the first request, shared by network failures and 428
    pub max_retries: u32,
    /// Backoff before the first network retry; doubles per retry
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Epochs older than this are rotated
    pub epoch_max_age: Duration,
    /// Rotate after this many group messages, if set
    pub epoch_max_uses: Option<u64>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: 256 * 1024,
            min_recipients: 2,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            epoch_max_age: Duration::from_secs(30 * 24 * 60 * 60),
            epoch_max_uses: None,
        }
    }
}

impl SenderConfig {
    /// Backoff before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}
