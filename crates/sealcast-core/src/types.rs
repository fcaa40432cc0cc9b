//! Identifiers and message types.

use std::fmt;

use sealcast_crypto::AccessKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable account identifier.
///
/// Serialized as a hyphenated UUID string, matching the server's JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Wrap a UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build from a 128-bit value (tests and fixtures).
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Raw bytes, as carried in the multi-recipient header.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", self.0)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Device number within an account. The primary device is 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The account's primary device.
    pub const PRIMARY: Self = Self(1);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One device of one account; the unit cryptographic sessions are kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolAddress {
    /// Account
    pub service_id: ServiceId,
    /// Device on that account
    pub device_id: DeviceId,
}

impl ProtocolAddress {
    /// Address a device.
    pub const fn new(service_id: ServiceId, device_id: DeviceId) -> Self {
        Self { service_id, device_id }
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service_id, self.device_id)
    }
}

/// Local conversation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u128);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Externally-addressable group identifier (routing id inside envelopes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Vec<u8>);

impl GroupId {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// How a recipient accepts sealed (sender-anonymous) delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Recipient refuses sealed delivery.
    Disabled,
    /// Recipient's mode is not known and no key is available.
    Unknown,
    /// Sealed delivery with the recipient's profile-derived key.
    Enabled,
    /// Sealed delivery from anyone; the key is irrelevant.
    Unrestricted,
}

impl AccessMode {
    /// Whether the recipient can take part in multi-recipient delivery.
    pub fn allows_sealed_delivery(self) -> bool {
        matches!(self, Self::Enabled | Self::Unrestricted)
    }
}

/// Sealed-delivery credential for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedSenderAccess {
    /// Recipient's access mode
    pub mode: AccessMode,
    /// Recipient's access key (may be random for unrestricted recipients)
    pub key: AccessKey,
}

impl SealedSenderAccess {
    /// Key contributed to a composite credential.
    ///
    /// Unrestricted recipients contribute zeros so they do not disturb the
    /// XOR of the other recipients' keys.
    pub fn composite_component(&self) -> AccessKey {
        match self.mode {
            AccessMode::Unrestricted => AccessKey::ZERO,
            AccessMode::Disabled | AccessMode::Unknown | AccessMode::Enabled => self.key,
        }
    }
}

/// Hint to receivers about how to treat an undecryptable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentHint {
    /// Show an error to the user
    #[default]
    Default,
    /// Request a resend silently
    Resendable,
    /// Drop silently
    Implicit,
}

impl ContentHint {
    /// Wire value carried in the envelope.
    pub fn wire_value(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Resendable => 1,
            Self::Implicit => 2,
        }
    }
}

/// A message about to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender timestamp; identifies the message within its thread
    pub timestamp: u64,
    /// Thread the message belongs to
    pub thread_id: ThreadId,
    /// Serialized content, unpadded
    pub body: Vec<u8>,
    /// Resend-log payload id, when the content is resendable
    pub payload_id: Option<u64>,
    /// Deliver only to currently connected devices
    pub is_online: bool,
    /// Wake recipients with a push
    pub is_urgent: bool,
    /// Story send (200 responses do not prove registration)
    pub is_story: bool,
    /// Group id the envelope should route to, when the message sets one
    pub envelope_group_id: Option<GroupId>,
    /// Receiver error-handling hint
    pub content_hint: ContentHint,
}

impl OutgoingMessage {
    /// Plain urgent message with no resend payload.
    pub fn new(thread_id: ThreadId, timestamp: u64, body: Vec<u8>) -> Self {
        Self {
            timestamp,
            thread_id,
            body,
            payload_id: None,
            is_online: false,
            is_urgent: true,
            is_story: false,
            envelope_group_id: None,
            content_hint: ContentHint::Default,
        }
    }
}
