//! Error types for shared-ciphertext delivery.
//!
//! [`SenderKeyError`] names the ways the shared path itself fails. Callers
//! never see it directly: [`SendError`] is what comes back per recipient,
//! and its classification tells the caller whether to retry and whether the
//! next attempt should skip the shared path.

use sealcast_core::{ProtocolAddress, ServiceId, StorageError};
use sealcast_crypto::CryptoError;
use thiserror::Error;

use crate::transport::DirectSendError;

/// Failures of the shared path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SenderKeyError {
    /// 401: the composite access key was rejected
    #[error("invalid composite authorization")]
    InvalidAuthHeader,

    /// 404: some addressed account does not exist; the server does not say
    /// which
    #[error("an addressed account could not be found")]
    InvalidRecipient,

    /// 409: local device lists were wrong and have been corrected
    #[error("device set changed")]
    DeviceUpdate,

    /// 410: stale sessions were archived
    #[error("stale devices")]
    StaleDevices,

    /// Envelope exceeds the server limit
    #[error("envelope of {size} bytes exceeds limit of {limit}")]
    OversizeMessage {
        /// Encoded size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// A ready recipient has no access key
    #[error("incomplete access key set: no key for {0}")]
    IncompleteAccessKeys(ServiceId),

    /// A ready device has no usable session to take a registration id from
    #[error("no session for {0}")]
    MissingSession(ProtocolAddress),

    /// The distribution message to this recipient did not go through
    #[error("distribution message failed: {0}")]
    RecipientDistributionFailed(DirectSendError),

    /// The thread's epoch changed after the send was prepared
    #[error("sender key rotated since prepare")]
    EpochRotated,

    /// A ready recipient is not recorded as holding the current epoch
    #[error("{0} does not hold the current sender key")]
    EpochNotDelivered(ServiceId),
}

/// Per recipient result of a shared send that did not deliver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Never entered the shared path
    #[error("recipient is not eligible for shared delivery")]
    NotEligible,

    /// The shared path cannot be used for this attempt; a fanout send may
    /// still succeed
    #[error("shared delivery unavailable: {0}")]
    FastPathUnavailable(SenderKeyError),

    /// Device bookkeeping was corrected; rebuild the recipient list and
    /// retry
    #[error("must rebuild and retry: {0}")]
    MustRebuild(SenderKeyError),

    /// The distribution message to this recipient failed
    #[error("distribution failed: {0}")]
    Distribution(DirectSendError),

    /// A 428 challenge was not passed
    #[error("spam challenge required")]
    ChallengeRequired,

    /// Network failures outlasted the retry budget
    #[error("transport failure: {0}")]
    Transport(String),

    /// Status with no dedicated handling, surfaced verbatim
    #[error("unexpected HTTP status {status}")]
    Http {
        /// Status code
        status: u16,
    },

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Encryption or encoding failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Upstream cancelled before the server request was issued
    #[error("send cancelled")]
    Cancelled,

    /// A response body did not parse
    #[error("invalid server response: {0}")]
    InvalidResponse(String),
}

impl From<SenderKeyError> for SendError {
    fn from(err: SenderKeyError) -> Self {
        match err {
            SenderKeyError::RecipientDistributionFailed(inner) => Self::Distribution(inner),
            SenderKeyError::DeviceUpdate
            | SenderKeyError::StaleDevices
            | SenderKeyError::EpochRotated
            | SenderKeyError::EpochNotDelivered(_) => Self::MustRebuild(err),
            SenderKeyError::InvalidAuthHeader
            | SenderKeyError::InvalidRecipient
            | SenderKeyError::OversizeMessage { .. }
            | SenderKeyError::IncompleteAccessKeys(_)
            | SenderKeyError::MissingSession(_) => Self::FastPathUnavailable(err),
        }
    }
}

impl SendError {
    /// Returns true if resending this message may succeed.
    ///
    /// Only a failed challenge and cancellation are final for the attempt;
    /// everything else is worth another try, through fanout if
    /// [`is_fanout_only`](Self::is_fanout_only) says so.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ChallengeRequired | Self::Cancelled | Self::NotEligible => false,
            Self::Distribution(DirectSendError::Unregistered) => false,
            Self::Storage(err) => err.is_transient(),
            Self::Crypto(err) => !err.is_fatal(),
            Self::FastPathUnavailable(_)
            | Self::MustRebuild(_)
            | Self::Distribution(_)
            | Self::Transport(_)
            | Self::Http { .. }
            | Self::InvalidResponse(_) => true,
        }
    }

    /// Returns true if the next attempt for this recipient should skip the
    /// shared path and fan out.
    pub fn is_fanout_only(&self) -> bool {
        matches!(self, Self::NotEligible | Self::FastPathUnavailable(_) | Self::Distribution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_errors_map_to_their_classes() {
        assert!(matches!(
            SendError::from(SenderKeyError::InvalidAuthHeader),
            SendError::FastPathUnavailable(_)
        ));
        assert!(matches!(
            SendError::from(SenderKeyError::InvalidRecipient),
            SendError::FastPathUnavailable(_)
        ));
        assert!(matches!(
            SendError::from(SenderKeyError::OversizeMessage { size: 10, limit: 5 }),
            SendError::FastPathUnavailable(_)
        ));
        assert_eq!(
            SendError::from(SenderKeyError::StaleDevices),
            SendError::MustRebuild(SenderKeyError::StaleDevices)
        );
        assert_eq!(
            SendError::from(SenderKeyError::RecipientDistributionFailed(
                DirectSendError::Unregistered
            )),
            SendError::Distribution(DirectSendError::Unregistered)
        );
    }

    #[test]
    fn epoch_changes_must_rebuild() {
        assert_eq!(
            SendError::from(SenderKeyError::EpochRotated),
            SendError::MustRebuild(SenderKeyError::EpochRotated)
        );
        let recipient = ServiceId::from_u128(7);
        assert_eq!(
            SendError::from(SenderKeyError::EpochNotDelivered(recipient)),
            SendError::MustRebuild(SenderKeyError::EpochNotDelivered(recipient))
        );
    }

    #[test]
    fn must_rebuild_is_retryable_but_not_fanout_only() {
        let err = SendError::from(SenderKeyError::DeviceUpdate);
        assert!(err.is_retryable());
        assert!(!err.is_fanout_only());
    }

    #[test]
    fn fast_path_unavailable_is_fanout_only() {
        let err = SendError::from(SenderKeyError::InvalidRecipient);
        assert!(err.is_retryable());
        assert!(err.is_fanout_only());
    }

    #[test]
    fn unregistered_distribution_failure_is_final() {
        let err = SendError::Distribution(DirectSendError::Unregistered);
        assert!(!err.is_retryable());
    }

    #[test]
    fn challenge_failure_is_final() {
        assert!(!SendError::ChallengeRequired.is_retryable());
    }
}
