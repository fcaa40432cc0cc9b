//! Transactional storage.
//!
//! The engine never holds storage state in process. Every read goes through a
//! [`ReadTxn`] and every mutation through a [`WriteTxn`], both scoped to a
//! closure:
//!
//! - `write` commits when the closure returns `Ok` and rolls back when it
//!   returns `Err`
//! - writes are serialized, so a read-modify-write inside one closure is
//!   atomic with respect to other writers
//! - [`WriteTxn::on_commit`] registers finalizers that run after a successful
//!   commit and are dropped on rollback
//!
//! The trait is synchronous. Closures must not await or re-enter the storage.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;
use crate::{
    records::{
        MessageRecord, PendingDelivery, RecipientRecord, SenderKeyRecord, SessionRecord,
        ThreadRecord,
    },
    types::{ProtocolAddress, ServiceId, ThreadId},
};

/// Callback run after a write transaction commits.
pub type Finalizer = Box<dyn FnOnce() + Send>;

/// Read access to every record kind.
pub trait ReadTxn {
    /// Thread and its live membership.
    fn thread(&self, thread_id: ThreadId) -> Result<Option<ThreadRecord>, StorageError>;

    /// Recipient bookkeeping.
    fn recipient(&self, service_id: ServiceId) -> Result<Option<RecipientRecord>, StorageError>;

    /// Session with one device.
    fn session(&self, address: ProtocolAddress) -> Result<Option<SessionRecord>, StorageError>;

    /// Current sender-key epoch of a thread.
    fn sender_key(&self, thread_id: ThreadId) -> Result<Option<SenderKeyRecord>, StorageError>;

    /// Pending deliveries recorded for a resend payload, in key order.
    fn pending_deliveries(&self, payload_id: u64) -> Result<Vec<PendingDelivery>, StorageError>;

    /// Send bookkeeping for one message.
    fn message(
        &self,
        thread_id: ThreadId,
        timestamp: u64,
    ) -> Result<Option<MessageRecord>, StorageError>;
}

/// Mutations, visible to later reads in the same transaction.
pub trait WriteTxn: ReadTxn {
    /// Insert or replace a thread.
    fn put_thread(&mut self, record: &ThreadRecord) -> Result<(), StorageError>;

    /// Insert or replace a recipient.
    fn put_recipient(&mut self, record: &RecipientRecord) -> Result<(), StorageError>;

    /// Insert or replace a session.
    fn put_session(
        &mut self,
        address: ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StorageError>;

    /// Remove a session. Removing a missing session is not an error.
    fn delete_session(&mut self, address: ProtocolAddress) -> Result<(), StorageError>;

    /// Insert or replace a thread's sender-key epoch.
    fn put_sender_key(
        &mut self,
        thread_id: ThreadId,
        record: &SenderKeyRecord,
    ) -> Result<(), StorageError>;

    /// Drop a thread's sender-key epoch.
    fn delete_sender_key(&mut self, thread_id: ThreadId) -> Result<(), StorageError>;

    /// Insert or replace a pending delivery, keyed by (payload, recipient,
    /// device).
    fn put_pending_delivery(&mut self, delivery: &PendingDelivery) -> Result<(), StorageError>;

    /// Insert or replace a message's send bookkeeping.
    fn put_message(&mut self, record: &MessageRecord) -> Result<(), StorageError>;

    /// Run `finalizer` once this transaction has committed.
    fn on_commit(&mut self, finalizer: Finalizer);
}

/// Storage with closure-scoped transactions.
///
/// Must be Clone (shared by the sender and its tests), Send + Sync, and
/// synchronous. Clones access the same underlying data.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Run `f` against a consistent snapshot.
    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<StorageError>;

    /// Run `f` in a write transaction.
    ///
    /// Commits if `f` returns `Ok`, then runs the registered finalizers in
    /// registration order. Rolls back if `f` returns `Err` or the commit
    /// fails; finalizers are then dropped unrun.
    fn write<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<StorageError>;
}

fn run_finalizers(finalizers: Vec<Finalizer>) {
    for finalizer in finalizers {
        finalizer();
    }
}
