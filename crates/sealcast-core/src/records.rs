//! Persisted records.
//!
//! Everything the delivery engine reads or writes through a storage
//! transaction. Records are plain serde structs; backends decide the encoding
//! (redb stores them as CBOR).

use std::collections::{BTreeMap, BTreeSet};

use sealcast_crypto::{ChainState, DistributionId};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, GroupId, ServiceId, ThreadId};

/// A conversation and its live membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Local thread id
    pub thread_id: ThreadId,
    /// The thread's one authoritative routing id
    pub group_id: GroupId,
    /// Current members; the local account may be listed
    pub members: BTreeSet<ServiceId>,
}

impl ThreadRecord {
    /// Whether `service_id` is currently a member.
    pub fn is_member(&self, service_id: &ServiceId) -> bool {
        self.members.contains(service_id)
    }
}

/// What the client knows about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    /// Account
    pub service_id: ServiceId,
    /// Known devices
    pub devices: BTreeSet<DeviceId>,
    /// False once the server reported the account as unregistered
    pub registered: bool,
}

impl RecipientRecord {
    /// Registered account with the given devices.
    pub fn new(service_id: ServiceId, devices: impl IntoIterator<Item = DeviceId>) -> Self {
        Self { service_id, devices: devices.into_iter().collect(), registered: true }
    }
}

/// 1:1 session state for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Registration id the remote device advertised
    pub remote_registration_id: u32,
    /// False once the session has been archived (stale device)
    pub has_current_state: bool,
}

impl SessionRecord {
    /// Live session with the given remote registration id.
    pub const fn current(remote_registration_id: u32) -> Self {
        Self { remote_registration_id, has_current_state: true }
    }
}

/// Devices of one recipient that received an epoch, with the registration
/// id each device had at the time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveredDevices {
    /// Device to registration id at delivery
    pub devices: BTreeMap<DeviceId, u32>,
    /// When the distribution message was delivered
    pub delivered_at_ms: u64,
}

/// Sender-key epoch for one thread.
///
/// A recipient appears in `delivered` only after a distribution message was
/// provably delivered to the listed devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    /// Epoch identifier
    pub distribution_id: DistributionId,
    /// Creation time
    pub created_at_ms: u64,
    /// Group messages encrypted under this epoch
    pub use_count: u64,
    /// Current sending chain
    pub chain: ChainState,
    /// Per recipient delivery proof
    pub delivered: BTreeMap<ServiceId, DeliveredDevices>,
}

/// Resend bookkeeping for one device that received a shared ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelivery {
    /// Resend-log payload id
    pub payload_id: u64,
    /// Account
    pub recipient: ServiceId,
    /// Device
    pub device_id: DeviceId,
    /// Timestamp of the message that was delivered
    pub message_timestamp: u64,
}

/// Per recipient outcome stored on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientSendState {
    /// Accepted by the server
    Sent {
        /// Delivered anonymously
        sealed_sender: bool,
    },
    /// Server reported the account as unregistered
    Unregistered,
}

/// Send bookkeeping for one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Thread
    pub thread_id: ThreadId,
    /// Message timestamp
    pub timestamp: u64,
    /// Recipient states recorded so far
    pub recipients: BTreeMap<ServiceId, RecipientSendState>,
}

impl MessageRecord {
    /// Record with no recipient states yet.
    pub fn new(thread_id: ThreadId, timestamp: u64) -> Self {
        Self { thread_id, timestamp, recipients: BTreeMap::new() }
    }
}
