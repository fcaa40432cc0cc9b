//! Property-based tests for the storage backends
//!
//! 1. **Backend equivalence**: the same operation sequence leaves memory and
//!    redb storage with the same observable records
//! 2. **Atomic writes under chaos**: a write that touches several records
//!    either lands completely or not at all

use std::collections::BTreeSet;

use proptest::prelude::*;
use sealcast_core::{
    ChaoticStorage, DeviceId, GroupId, MemoryStorage, PendingDelivery, ProtocolAddress,
    RecipientRecord, RedbStorage, ServiceId, SessionRecord, Storage, StorageError, ThreadId,
    ThreadRecord,
};

#[derive(Debug, Clone)]
enum Op {
    PutRecipient { account: u8, devices: BTreeSet<u8> },
    PutSession { account: u8, device: u8, registration_id: u16 },
    DeleteSession { account: u8, device: u8 },
    PutPending { payload_id: u8, account: u8, device: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, prop::collection::btree_set(1u8..5, 0..4))
            .prop_map(|(account, devices)| Op::PutRecipient { account, devices }),
        (0u8..4, 1u8..5, any::<u16>()).prop_map(|(account, device, registration_id)| {
            Op::PutSession { account, device, registration_id }
        }),
        (0u8..4, 1u8..5).prop_map(|(account, device)| Op::DeleteSession { account, device }),
        (0u8..3, 0u8..4, 1u8..5).prop_map(|(payload_id, account, device)| Op::PutPending {
            payload_id,
            account,
            device,
        }),
    ]
}

fn account(n: u8) -> ServiceId {
    ServiceId::from_u128(u128::from(n) + 1)
}

fn apply(storage: &impl Storage, op: &Op) -> Result<(), StorageError> {
    storage.write(|tx| match op {
        Op::PutRecipient { account: a, devices } => tx.put_recipient(&RecipientRecord::new(
            account(*a),
            devices.iter().map(|d| DeviceId(u32::from(*d))),
        )),
        Op::PutSession { account: a, device, registration_id } => tx.put_session(
            ProtocolAddress::new(account(*a), DeviceId(u32::from(*device))),
            &SessionRecord::current(u32::from(*registration_id)),
        ),
        Op::DeleteSession { account: a, device } => {
            tx.delete_session(ProtocolAddress::new(account(*a), DeviceId(u32::from(*device))))
        },
        Op::PutPending { payload_id, account: a, device } => {
            tx.put_pending_delivery(&PendingDelivery {
                payload_id: u64::from(*payload_id),
                recipient: account(*a),
                device_id: DeviceId(u32::from(*device)),
                message_timestamp: 1,
            })
        },
    })
}

/// Everything observable for the keys the strategy can produce.
fn observe(storage: &impl Storage) -> Vec<String> {
    storage
        .read(|tx| {
            let mut seen = Vec::new();
            for a in 0..4 {
                seen.push(format!("{:?}", tx.recipient(account(a))?));
                for d in 1..5 {
                    let address = ProtocolAddress::new(account(a), DeviceId(d));
                    seen.push(format!("{:?}", tx.session(address)?));
                }
            }
            for payload_id in 0..3 {
                seen.push(format!("{:?}", tx.pending_deliveries(payload_id)?));
            }
            Ok::<_, StorageError>(seen)
        })
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_memory_and_redb_agree(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let redb = RedbStorage::open(dir.path().join("props.redb")).unwrap();
        let memory = MemoryStorage::new();

        for op in &ops {
            apply(&memory, op).unwrap();
            apply(&redb, op).unwrap();
        }

        prop_assert_eq!(observe(&memory), observe(&redb));
    }

    #[test]
    fn prop_chaotic_writes_are_all_or_nothing(seed in any::<u64>(), threads in 1u128..30) {
        let chaotic = ChaoticStorage::with_seed(MemoryStorage::new(), 0.4, seed);

        for id in 0..threads {
            let member = ServiceId::from_u128(id + 100);
            let _ = chaotic.write(|tx| {
                tx.put_thread(&ThreadRecord {
                    thread_id: ThreadId(id),
                    group_id: GroupId(id.to_be_bytes().to_vec()),
                    members: [member].into(),
                })?;
                tx.put_recipient(&RecipientRecord::new(member, [DeviceId::PRIMARY]))
            });
        }

        for id in 0..threads {
            let (thread, recipient) = chaotic
                .inner()
                .read(|tx| {
                    Ok::<_, StorageError>((
                        tx.thread(ThreadId(id))?,
                        tx.recipient(ServiceId::from_u128(id + 100))?,
                    ))
                })
                .unwrap();
            prop_assert_eq!(thread.is_some(), recipient.is_some(), "torn write for thread {}", id);
        }
    }
}
