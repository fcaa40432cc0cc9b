//! External collaborators.
//!
//! The engine performs no I/O of its own. It talks to the server through
//! [`Transport`], sends distribution messages through the ordinary 1:1 path
//! via [`DirectSender`], and hands spam challenges to a
//! [`ChallengeResolver`].

use std::time::Duration;

use async_trait::async_trait;
use sealcast_core::{DeviceId, SealedSenderAccess, ServiceId, ThreadId};
use sealcast_crypto::AccessKey;
use thiserror::Error;

/// Multi-recipient submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiRecipientRequest {
    /// Encoded envelope
    pub envelope: Vec<u8>,
    /// XOR of the access keys of every addressed recipient
    pub access_key: AccessKey,
    /// Message timestamp
    pub timestamp: u64,
    /// Deliver only to connected devices
    pub online: bool,
    /// Wake recipients
    pub urgent: bool,
    /// Story send
    pub story: bool,
}

/// Raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
    /// Parsed `Retry-After`, when present
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Response with a status and body and no retry hint.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into(), retry_after: None }
    }
}

/// The request never produced an HTTP response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure
    #[error("network failure: {0}")]
    Network(String),

    /// No response in time
    #[error("request timed out")]
    Timeout,
}

/// HTTP client for the multi-recipient endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit one request. Any HTTP status is `Ok`.
    async fn submit(&self, request: &MultiRecipientRequest)
    -> Result<HttpResponse, TransportError>;
}

/// One 1:1 distribution message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSend {
    /// Recipient account
    pub recipient: ServiceId,
    /// Serialized distribution message, sent as plaintext content
    pub payload: Vec<u8>,
    /// Thread of the message this distribution is sent on behalf of
    pub on_behalf_of_thread: ThreadId,
    /// Timestamp of that message
    pub on_behalf_of_timestamp: u64,
    /// Sealed-sender parameters, when the recipient has an access key
    pub access: Option<SealedSenderAccess>,
}

/// Proof that a distribution message reached a recipient's devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReceipt {
    /// Timestamp of the 1:1 message
    pub timestamp: u64,
    /// Devices the message was encrypted for, with the registration id of
    /// the session used for each
    pub devices: Vec<(DeviceId, u32)>,
}

/// Failure of a 1:1 send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectSendError {
    /// The account does not exist on the server
    #[error("recipient is not registered")]
    Unregistered,

    /// Connection-level failure
    #[error("network failure: {0}")]
    Network(String),

    /// Server rejected the message
    #[error("rejected with status {status}")]
    Rejected {
        /// HTTP status
        status: u16,
    },

    /// Local session or encryption failure
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The send went through but reached no device
    #[error("no devices received the message")]
    NoDevices,
}

/// The ordinary per-recipient send path.
#[async_trait]
pub trait DirectSender: Send + Sync {
    /// Encrypt and send a distribution message to every device of
    /// `send.recipient`.
    async fn send_distribution(
        &self,
        send: DistributionSend,
    ) -> Result<DistributionReceipt, DirectSendError>;
}

/// Resolves proof-of-work or captcha challenges.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    /// Resolve `body`; returns whether the challenge was passed.
    async fn resolve(&self, body: &[u8], retry_after: Duration) -> bool;
}
