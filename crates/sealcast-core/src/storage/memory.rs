#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{Finalizer, ReadTxn, Storage, StorageError, WriteTxn, run_finalizers};
use crate::{
    records::{
        MessageRecord, PendingDelivery, RecipientRecord, SenderKeyRecord, SessionRecord,
        ThreadRecord,
    },
    types::{DeviceId, ProtocolAddress, ServiceId, ThreadId},
};

/// In-memory storage for tests and simulation.
///
/// All tables live behind one `Arc<Mutex<>>`, so clones share state. The lock
/// is held for the whole closure, which serializes transactions. A write
/// works on a copy of the tables and swaps it in on commit; rollback just
/// drops the copy. A poisoned lock surfaces as `StorageError::Io`.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Clone, Default)]
struct Tables {
    threads: BTreeMap<ThreadId, ThreadRecord>,
    recipients: BTreeMap<ServiceId, RecipientRecord>,
    sessions: BTreeMap<ProtocolAddress, SessionRecord>,
    sender_keys: BTreeMap<ThreadId, SenderKeyRecord>,
    /// Keyed by (payload id, recipient, device)
    pending: BTreeMap<(u64, ServiceId, DeviceId), PendingDelivery>,
    /// Keyed by (thread, message timestamp)
    messages: BTreeMap<(ThreadId, u64), MessageRecord>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory storage mutex poisoned".into()))
    }
}

impl ReadTxn for Tables {
    fn thread(&self, thread_id: ThreadId) -> Result<Option<ThreadRecord>, StorageError> {
        Ok(self.threads.get(&thread_id).cloned())
    }

    fn recipient(&self, service_id: ServiceId) -> Result<Option<RecipientRecord>, StorageError> {
        Ok(self.recipients.get(&service_id).cloned())
    }

    fn session(&self, address: ProtocolAddress) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self.sessions.get(&address).copied())
    }

    fn sender_key(&self, thread_id: ThreadId) -> Result<Option<SenderKeyRecord>, StorageError> {
        Ok(self.sender_keys.get(&thread_id).cloned())
    }

    fn pending_deliveries(&self, payload_id: u64) -> Result<Vec<PendingDelivery>, StorageError> {
        Ok(self
            .pending
            .iter()
            .filter(|((id, _, _), _)| *id == payload_id)
            .map(|(_, delivery)| *delivery)
            .collect())
    }

    fn message(
        &self,
        thread_id: ThreadId,
        timestamp: u64,
    ) -> Result<Option<MessageRecord>, StorageError> {
        Ok(self.messages.get(&(thread_id, timestamp)).cloned())
    }
}

struct MemoryWriteTxn {
    tables: Tables,
    finalizers: Vec<Finalizer>,
}

impl ReadTxn for MemoryWriteTxn {
    fn thread(&self, thread_id: ThreadId) -> Result<Option<ThreadRecord>, StorageError> {
        self.tables.thread(thread_id)
    }

    fn recipient(&self, service_id: ServiceId) -> Result<Option<RecipientRecord>, StorageError> {
        self.tables.recipient(service_id)
    }

    fn session(&self, address: ProtocolAddress) -> Result<Option<SessionRecord>, StorageError> {
        self.tables.session(address)
    }

    fn sender_key(&self, thread_id: ThreadId) -> Result<Option<SenderKeyRecord>, StorageError> {
        self.tables.sender_key(thread_id)
    }

    fn pending_deliveries(&self, payload_id: u64) -> Result<Vec<PendingDelivery>, StorageError> {
        self.tables.pending_deliveries(payload_id)
    }

    fn message(
        &self,
        thread_id: ThreadId,
        timestamp: u64,
    ) -> Result<Option<MessageRecord>, StorageError> {
        self.tables.message(thread_id, timestamp)
    }
}

impl WriteTxn for MemoryWriteTxn {
    fn put_thread(&mut self, record: &ThreadRecord) -> Result<(), StorageError> {
        self.tables.threads.insert(record.thread_id, record.clone());
        Ok(())
    }

    fn put_recipient(&mut self, record: &RecipientRecord) -> Result<(), StorageError> {
        self.tables.recipients.insert(record.service_id, record.clone());
        Ok(())
    }

    fn put_session(
        &mut self,
        address: ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StorageError> {
        self.tables.sessions.insert(address, *record);
        Ok(())
    }

    fn delete_session(&mut self, address: ProtocolAddress) -> Result<(), StorageError> {
        self.tables.sessions.remove(&address);
        Ok(())
    }

    fn put_sender_key(
        &mut self,
        thread_id: ThreadId,
        record: &SenderKeyRecord,
    ) -> Result<(), StorageError> {
        self.tables.sender_keys.insert(thread_id, record.clone());
        Ok(())
    }

    fn delete_sender_key(&mut self, thread_id: ThreadId) -> Result<(), StorageError> {
        self.tables.sender_keys.remove(&thread_id);
        Ok(())
    }

    fn put_pending_delivery(&mut self, delivery: &PendingDelivery) -> Result<(), StorageError> {
        self.tables
            .pending
            .insert((delivery.payload_id, delivery.recipient, delivery.device_id), *delivery);
        Ok(())
    }

    fn put_message(&mut self, record: &MessageRecord) -> Result<(), StorageError> {
        self.tables.messages.insert((record.thread_id, record.timestamp), record.clone());
        Ok(())
    }

    fn on_commit(&mut self, finalizer: Finalizer) {
        self.finalizers.push(finalizer);
    }
}

impl Storage for MemoryStorage {
    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<StorageError>,
    {
        let tables = self.lock()?;
        f(&*tables)
    }

    fn write<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<StorageError>,
    {
        let mut tables = self.lock()?;
        let mut txn = MemoryWriteTxn { tables: tables.clone(), finalizers: Vec::new() };

        let result = f(&mut txn)?;

        *tables = txn.tables;
        drop(tables);

        run_finalizers(txn.finalizers);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::GroupId;

    fn thread(id: u128) -> ThreadRecord {
        ThreadRecord {
            thread_id: ThreadId(id),
            group_id: GroupId(vec![1, 2, 3]),
            members: [ServiceId::from_u128(1)].into(),
        }
    }

    #[test]
    fn write_commits_on_ok() {
        let storage = MemoryStorage::new();

        storage
            .write(|tx| -> Result<(), StorageError> { tx.put_thread(&thread(7)) })
            .unwrap();

        let loaded = storage.read(|tx| -> Result<_, StorageError> { tx.thread(ThreadId(7)) });
        assert_eq!(loaded.unwrap(), Some(thread(7)));
    }

    #[test]
    fn write_rolls_back_on_err() {
        let storage = MemoryStorage::new();

        let result = storage.write(|tx| {
            tx.put_thread(&thread(7))?;
            Err::<(), _>(StorageError::Io("abort".into()))
        });
        assert!(result.is_err());

        let loaded = storage.read(|tx| -> Result<_, StorageError> { tx.thread(ThreadId(7)) });
        assert_eq!(loaded.unwrap(), None);
    }

    #[test]
    fn writes_are_visible_inside_the_same_transaction() {
        let storage = MemoryStorage::new();

        let seen = storage
            .write(|tx| -> Result<_, StorageError> {
                tx.put_thread(&thread(3))?;
                tx.thread(ThreadId(3))
            })
            .unwrap();

        assert!(seen.is_some());
    }

    #[test]
    fn finalizers_run_only_after_commit() {
        let storage = MemoryStorage::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        storage
            .write(|tx| -> Result<(), StorageError> {
                tx.on_commit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
                Ok(())
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&runs);
        let _ = storage.write(|tx| {
            tx.on_commit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            Err::<(), _>(StorageError::Io("abort".into()))
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1, "rolled back finalizer must not run");
    }

    #[test]
    fn pending_deliveries_are_scoped_to_payload() {
        let storage = MemoryStorage::new();
        let alice = ServiceId::from_u128(1);

        storage
            .write(|tx| -> Result<(), StorageError> {
                for (payload_id, device) in [(1, 1), (1, 2), (2, 1)] {
                    tx.put_pending_delivery(&PendingDelivery {
                        payload_id,
                        recipient: alice,
                        device_id: DeviceId(device),
                        message_timestamp: 100,
                    })?;
                }
                Ok(())
            })
            .unwrap();

        let first = storage.read(|tx| -> Result<_, StorageError> { tx.pending_deliveries(1) });
        assert_eq!(first.unwrap().len(), 2);
    }
}
