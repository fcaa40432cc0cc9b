//! Sealcast core.
//!
//! Domain types, the environment abstraction and the transactional storage
//! layer shared by the delivery engine and the simulation harness.
//!
//! # Components
//!
//! - [`types`]: account, device, thread and message identifiers
//! - [`records`]: everything the engine persists (recipients, sessions,
//!   sender-key epochs, pending deliveries, per-message send state)
//! - [`storage`]: [`Storage`] with scoped read/write transactions and the
//!   memory, chaos and redb backends
//! - [`env`]: [`Environment`] for time, sleeping and randomness

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod records;
pub mod storage;
mod system_env;
pub mod types;

pub use env::Environment;
pub use records::{
    DeliveredDevices, MessageRecord, PendingDelivery, RecipientRecord, RecipientSendState,
    SenderKeyRecord, SessionRecord, ThreadRecord,
};
pub use storage::{
    ChaoticStorage, MemoryStorage, ReadTxn, RedbStorage, Storage, StorageError, WriteTxn,
};
pub use system_env::SystemEnv;
pub use types::{
    AccessMode, ContentHint, DeviceId, GroupId, OutgoingMessage, ProtocolAddress,
    SealedSenderAccess, ServiceId, ThreadId,
};
