//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from sender key and envelope operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Chain is too far behind the requested iteration
    #[error("chain too far behind: at iteration {current}, need {requested}")]
    ChainTooFarBehind {
        /// Current chain iteration
        current: u32,
        /// Requested iteration
        requested: u32,
    },

    /// Decryption failed (authentication tag mismatch)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Message was encrypted under a different epoch
    #[error("distribution id mismatch")]
    DistributionMismatch,

    /// Chain iteration would overflow
    #[error("chain iteration overflow at {current}")]
    IterationOverflow {
        /// Current iteration when overflow was detected
        current: u32,
    },

    /// Registration id does not fit the multi-recipient header
    #[error("registration id {registration_id} for device {device_id} exceeds 14 bits")]
    InvalidRegistrationId {
        /// Device the registration id belongs to
        device_id: u32,
        /// The out-of-range registration id
        registration_id: u32,
    },

    /// Envelope has no recipients
    #[error("envelope must address at least one device")]
    NoRecipients,

    /// Composite access key requested for an empty key set
    #[error("composite access key requires at least one key")]
    EmptyAccessKeySet,

    /// Padding terminator missing
    #[error("malformed padding")]
    MalformedPadding,

    /// CBOR encoding or decoding failed
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    /// Returns true if the error indicates corrupt or hostile input rather
    /// than local state that can be rebuilt.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DecryptionFailed { .. }
            | Self::MalformedPadding
            | Self::Encoding(_)
            | Self::IterationOverflow { .. } => true,

            Self::ChainTooFarBehind { .. }
            | Self::DistributionMismatch
            | Self::InvalidRegistrationId { .. }
            | Self::NoRecipients
            | Self::EmptyAccessKeySet => false,
        }
    }
}
