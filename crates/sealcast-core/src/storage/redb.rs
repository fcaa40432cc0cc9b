//! Redb-backed durable storage implementation.
//!
//! One redb transaction per `read`/`write` call. Values are CBOR-encoded
//! records; keys are fixed-width big-endian so related keys sort together.

use std::{fmt::Display, path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Finalizer, ReadTxn, Storage, StorageError, WriteTxn, run_finalizers};
use crate::{
    records::{
        MessageRecord, PendingDelivery, RecipientRecord, SenderKeyRecord, SessionRecord,
        ThreadRecord,
    },
    types::{DeviceId, ProtocolAddress, ServiceId, ThreadId},
};

type Bytes = &'static [u8];

/// Key: thread id [16]
const THREADS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("threads");

/// Key: service id [16]
const RECIPIENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("recipients");

/// Key: service id [16] + device id [4]
const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

/// Key: thread id [16]
const SENDER_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sender_keys");

/// Key: payload id [8] + service id [16] + device id [4]
const PENDING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending_deliveries");

/// Key: thread id [16] + timestamp [8]
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

const ALL_TABLES: [TableDefinition<&[u8], &[u8]>; 6] =
    [THREADS, RECIPIENTS, SESSIONS, SENDER_KEYS, PENDING, MESSAGES];

/// Durable storage backed by Redb.
///
/// Redb allows one write transaction at a time, which gives `write` its
/// serialization guarantee. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path, creating tables.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        for table in ALL_TABLES {
            let _ = txn.open_table(table).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<StorageError>,
    {
        let txn = self.db.begin_read().map_err(io)?;
        f(&RedbTxn { txn, finalizers: Vec::new() })
    }

    fn write<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<StorageError>,
    {
        let txn = self.db.begin_write().map_err(io)?;
        let mut scoped = RedbTxn { txn, finalizers: Vec::new() };

        match f(&mut scoped) {
            Ok(result) => {
                let RedbTxn { txn, finalizers } = scoped;
                txn.commit().map_err(io)?;
                run_finalizers(finalizers);
                Ok(result)
            },
            Err(err) => {
                if let Err(abort) = scoped.txn.abort() {
                    tracing::warn!(error = %abort, "failed to abort redb transaction");
                }
                Err(err)
            },
        }
    }
}

/// Uniform table access over read and write transactions.
trait OpenTable {
    type Table<'a>: ReadableTable<Bytes, Bytes>
    where
        Self: 'a;

    fn open(&self, table: TableDefinition<'_, Bytes, Bytes>)
    -> Result<Self::Table<'_>, StorageError>;
}

impl OpenTable for redb::ReadTransaction {
    type Table<'a> = redb::ReadOnlyTable<Bytes, Bytes>;

    fn open(
        &self,
        table: TableDefinition<'_, Bytes, Bytes>,
    ) -> Result<Self::Table<'_>, StorageError> {
        self.open_table(table).map_err(io)
    }
}

impl OpenTable for redb::WriteTransaction {
    type Table<'a> = redb::Table<'a, Bytes, Bytes>;

    fn open(
        &self,
        table: TableDefinition<'_, Bytes, Bytes>,
    ) -> Result<Self::Table<'_>, StorageError> {
        self.open_table(table).map_err(io)
    }
}

struct RedbTxn<T> {
    txn: T,
    finalizers: Vec<Finalizer>,
}

impl<T: OpenTable> RedbTxn<T> {
    fn get<V: DeserializeOwned>(
        &self,
        table: TableDefinition<'_, Bytes, Bytes>,
        key: &[u8],
    ) -> Result<Option<V>, StorageError> {
        let table = self.txn.open(table)?;
        match table.get(key).map_err(io)? {
            Some(value) => decode(value.value()).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: OpenTable> ReadTxn for RedbTxn<T> {
    fn thread(&self, thread_id: ThreadId) -> Result<Option<ThreadRecord>, StorageError> {
        self.get(THREADS, &thread_key(thread_id))
    }

    fn recipient(&self, service_id: ServiceId) -> Result<Option<RecipientRecord>, StorageError> {
        self.get(RECIPIENTS, service_id.as_bytes())
    }

    fn session(&self, address: ProtocolAddress) -> Result<Option<SessionRecord>, StorageError> {
        self.get(SESSIONS, &session_key(address))
    }

    fn sender_key(&self, thread_id: ThreadId) -> Result<Option<SenderKeyRecord>, StorageError> {
        self.get(SENDER_KEYS, &thread_key(thread_id))
    }

    fn pending_deliveries(&self, payload_id: u64) -> Result<Vec<PendingDelivery>, StorageError> {
        let table = self.txn.open(PENDING)?;

        let mut start = [0x00u8; 28];
        let mut end = [0xffu8; 28];
        start[..8].copy_from_slice(&payload_id.to_be_bytes());
        end[..8].copy_from_slice(&payload_id.to_be_bytes());

        let mut deliveries = Vec::new();
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            deliveries.push(decode(value.value())?);
        }
        Ok(deliveries)
    }

    fn message(
        &self,
        thread_id: ThreadId,
        timestamp: u64,
    ) -> Result<Option<MessageRecord>, StorageError> {
        self.get(MESSAGES, &message_key(thread_id, timestamp))
    }
}

impl RedbTxn<redb::WriteTransaction> {
    fn insert<V: Serialize>(
        &mut self,
        table: TableDefinition<'_, Bytes, Bytes>,
        key: &[u8],
        value: &V,
    ) -> Result<(), StorageError> {
        let bytes = encode(value)?;
        let mut table = self.txn.open_table(table).map_err(io)?;
        table.insert(key, bytes.as_slice()).map_err(io)?;
        Ok(())
    }

    fn remove(
        &mut self,
        table: TableDefinition<'_, Bytes, Bytes>,
        key: &[u8],
    ) -> Result<(), StorageError> {
        let mut table = self.txn.open_table(table).map_err(io)?;
        table.remove(key).map_err(io)?;
        Ok(())
    }
}

impl WriteTxn for RedbTxn<redb::WriteTransaction> {
    fn put_thread(&mut self, record: &ThreadRecord) -> Result<(), StorageError> {
        self.insert(THREADS, &thread_key(record.thread_id), record)
    }

    fn put_recipient(&mut self, record: &RecipientRecord) -> Result<(), StorageError> {
        self.insert(RECIPIENTS, record.service_id.as_bytes(), record)
    }

    fn put_session(
        &mut self,
        address: ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StorageError> {
        self.insert(SESSIONS, &session_key(address), record)
    }

    fn delete_session(&mut self, address: ProtocolAddress) -> Result<(), StorageError> {
        self.remove(SESSIONS, &session_key(address))
    }

    fn put_sender_key(
        &mut self,
        thread_id: ThreadId,
        record: &SenderKeyRecord,
    ) -> Result<(), StorageError> {
        self.insert(SENDER_KEYS, &thread_key(thread_id), record)
    }

    fn delete_sender_key(&mut self, thread_id: ThreadId) -> Result<(), StorageError> {
        self.remove(SENDER_KEYS, &thread_key(thread_id))
    }

    fn put_pending_delivery(&mut self, delivery: &PendingDelivery) -> Result<(), StorageError> {
        let key = pending_key(delivery.payload_id, delivery.recipient, delivery.device_id);
        self.insert(PENDING, &key, delivery)
    }

    fn put_message(&mut self, record: &MessageRecord) -> Result<(), StorageError> {
        self.insert(MESSAGES, &message_key(record.thread_id, record.timestamp), record)
    }

    fn on_commit(&mut self, finalizer: Finalizer) {
        self.finalizers.push(finalizer);
    }
}

fn io(err: impl Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn thread_key(thread_id: ThreadId) -> [u8; 16] {
    thread_id.0.to_be_bytes()
}

fn session_key(address: ProtocolAddress) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(address.service_id.as_bytes());
    key[16..].copy_from_slice(&address.device_id.0.to_be_bytes());
    key
}

fn pending_key(payload_id: u64, recipient: ServiceId, device_id: DeviceId) -> [u8; 28] {
    let mut key = [0u8; 28];
    key[..8].copy_from_slice(&payload_id.to_be_bytes());
    key[8..24].copy_from_slice(recipient.as_bytes());
    key[24..].copy_from_slice(&device_id.0.to_be_bytes());
    key
}

fn message_key(thread_id: ThreadId, timestamp: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(&thread_id.0.to_be_bytes());
    key[16..].copy_from_slice(&timestamp.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use sealcast_crypto::{ChainState, DistributionId};
    use tempfile::tempdir;

    use super::*;
    use crate::{
        records::{DeliveredDevices, RecipientSendState},
        types::GroupId,
    };

    fn open() -> (tempfile::TempDir, RedbStorage) {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();
        (dir, storage)
    }

    #[test]
    fn sender_key_roundtrip() {
        let (_dir, storage) = open();
        let alice = ServiceId::from_u128(0xa11ce);

        let record = SenderKeyRecord {
            distribution_id: DistributionId::from_bytes([3; 16]),
            created_at_ms: 1_000,
            use_count: 4,
            chain: ChainState { chain_key: [9; 32], iteration: 4 },
            delivered: [(
                alice,
                DeliveredDevices { devices: [(DeviceId(1), 77)].into(), delivered_at_ms: 1_500 },
            )]
            .into(),
        };

        storage.write(|tx| tx.put_sender_key(ThreadId(5), &record)).unwrap();

        let loaded = storage.read(|tx| tx.sender_key(ThreadId(5))).unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[test]
    fn rollback_discards_writes_and_finalizers() {
        let (_dir, storage) = open();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        let result = storage.write(|tx| {
            tx.put_thread(&ThreadRecord {
                thread_id: ThreadId(1),
                group_id: GroupId(vec![1]),
                members: [ServiceId::from_u128(1)].into(),
            })?;
            tx.on_commit(Box::new(move || flag.store(true, Ordering::SeqCst)));
            Err::<(), _>(StorageError::Io("abort".into()))
        });

        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(storage.read(|tx| tx.thread(ThreadId(1))).unwrap(), None);

        // The aborted transaction released the writer.
        let record = ThreadRecord {
            thread_id: ThreadId(2),
            group_id: GroupId(vec![2]),
            members: [ServiceId::from_u128(2)].into(),
        };
        storage.write(|tx| tx.put_thread(&record)).unwrap();
        assert_eq!(storage.read(|tx| tx.thread(ThreadId(2))).unwrap(), Some(record));
    }

    #[test]
    fn delete_session_removes_only_that_device() {
        let (_dir, storage) = open();
        let bob = ServiceId::from_u128(0xb0b);
        let one = ProtocolAddress::new(bob, DeviceId(1));
        let two = ProtocolAddress::new(bob, DeviceId(2));

        storage
            .write(|tx| {
                tx.put_session(one, &SessionRecord::current(10))?;
                tx.put_session(two, &SessionRecord::current(20))?;
                tx.delete_session(one)
            })
            .unwrap();

        assert_eq!(storage.read(|tx| tx.session(one)).unwrap(), None);
        assert_eq!(storage.read(|tx| tx.session(two)).unwrap(), Some(SessionRecord::current(20)));
    }

    #[test]
    fn pending_deliveries_range_is_scoped_and_ordered() {
        let (_dir, storage) = open();
        let alice = ServiceId::from_u128(1);
        let bob = ServiceId::from_u128(2);

        storage
            .write(|tx| {
                for (payload_id, recipient, device) in
                    [(9, bob, 1), (9, alice, 2), (9, alice, 1), (10, alice, 1)]
                {
                    tx.put_pending_delivery(&PendingDelivery {
                        payload_id,
                        recipient,
                        device_id: DeviceId(device),
                        message_timestamp: 42,
                    })?;
                }
                Ok::<_, StorageError>(())
            })
            .unwrap();

        let pending = storage.read(|tx| tx.pending_deliveries(9)).unwrap();
        let keys: Vec<_> = pending.iter().map(|p| (p.recipient, p.device_id.0)).collect();
        assert_eq!(keys, vec![(alice, 1), (alice, 2), (bob, 1)]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        let carol = ServiceId::from_u128(0xca201);

        {
            let storage = RedbStorage::open(&path).unwrap();
            let mut record = MessageRecord::new(ThreadId(2), 77);
            record.recipients.insert(carol, RecipientSendState::Sent { sealed_sender: true });
            storage.write(|tx| tx.put_message(&record)).unwrap();
        }

        let storage = RedbStorage::open(&path).unwrap();
        let loaded = storage.read(|tx| tx.message(ThreadId(2), 77)).unwrap().unwrap();
        assert_eq!(
            loaded.recipients.get(&carol),
            Some(&RecipientSendState::Sent { sealed_sender: true })
        );
    }
}
