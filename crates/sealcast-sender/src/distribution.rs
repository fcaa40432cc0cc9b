//! Handing the current epoch to recipients that lack it.
//!
//! Planning happens inside the prepare transaction, so the set of recipients
//! that need the epoch is decided against the same state as eligibility.
//! Sending goes through the ordinary 1:1 path, one recipient at a time but
//! all concurrently. Recording is a single write.

use std::collections::BTreeMap;

use futures::future::join_all;
use sealcast_core::{
    Environment, OutgoingMessage, SealedSenderAccess, ServiceId, Storage, ThreadId, WriteTxn,
};
use sealcast_crypto::DistributionId;

use crate::{
    error::{SendError, SenderKeyError},
    reconcile::mark_unregistered,
    sender_key_store::SenderKeyStore,
    transport::{DirectSendError, DirectSender, DistributionReceipt, DistributionSend},
};

/// Distribution messages to send before the shared ciphertext.
#[derive(Debug, Clone)]
pub(crate) struct DistributionPlan {
    /// Epoch being distributed
    pub distribution_id: DistributionId,
    /// One entry per recipient that lacks the epoch
    pub sends: Vec<DistributionSend>,
}

/// Recipients after distribution.
#[derive(Debug, Default)]
pub(crate) struct DistributionOutcome {
    /// Received the epoch and can be addressed by the shared ciphertext
    pub delivered: Vec<ServiceId>,
    /// Did not; these drop out of the shared send
    pub failed: Vec<(ServiceId, SendError)>,
}

/// Ensure the thread has an epoch and list who still needs it.
pub(crate) fn plan_distribution<E: Environment>(
    tx: &mut dyn WriteTxn,
    store: &SenderKeyStore,
    env: &E,
    recipients: &[ServiceId],
    message: &OutgoingMessage,
    credentials: &BTreeMap<ServiceId, SealedSenderAccess>,
) -> Result<DistributionPlan, SendError> {
    let thread_id = message.thread_id;
    let record = store.current_or_create(tx, thread_id, env)?;
    let needing = store.recipients_needing_epoch(&*tx, thread_id, recipients)?;

    let mut sends = Vec::with_capacity(needing.len());
    if !needing.is_empty() {
        let payload = store.distribution_payload(&record)?;
        for recipient in recipients.iter().filter(|r| needing.contains(r)) {
            tracing::info!(%recipient, thread = %thread_id, "preparing distribution message");
            sends.push(DistributionSend {
                recipient: *recipient,
                payload: payload.clone(),
                on_behalf_of_thread: thread_id,
                on_behalf_of_timestamp: message.timestamp,
                access: credentials.get(recipient).copied(),
            });
        }
    }

    tracing::debug!(
        thread = %thread_id,
        distribution_id = %record.distribution_id,
        needing = sends.len(),
        "planned distribution"
    );

    Ok(DistributionPlan { distribution_id: record.distribution_id, sends })
}

/// Send every planned distribution message concurrently.
pub(crate) async fn send_distributions(
    direct: &dyn DirectSender,
    sends: Vec<DistributionSend>,
) -> Vec<(ServiceId, Result<DistributionReceipt, DirectSendError>)> {
    join_all(sends.into_iter().map(|send| async move {
        let recipient = send.recipient;
        (recipient, direct.send_distribution(send).await)
    }))
    .await
}

/// Record the results of [`send_distributions`] in one write.
///
/// A receipt naming no devices counts as a failed distribution.
/// Unregistered recipients are marked as such. Delivered devices are
/// recorded against the epoch; if that fails (storage error, or the epoch
/// rotated underneath us) every delivered recipient is demoted to failed,
/// since without the record a later send would not know they hold the key.
pub(crate) fn record_distributions<S: Storage>(
    storage: &S,
    store: &SenderKeyStore,
    thread_id: ThreadId,
    timestamp: u64,
    distribution_id: DistributionId,
    results: Vec<(ServiceId, Result<DistributionReceipt, DirectSendError>)>,
    now_ms: u64,
) -> DistributionOutcome {
    let mut receipts = Vec::new();
    let mut failures = Vec::new();
    for (recipient, result) in results {
        let result = match result {
            Ok(receipt) if receipt.devices.is_empty() => Err(DirectSendError::NoDevices),
            other => other,
        };
        match result {
            Ok(receipt) => receipts.push((recipient, receipt)),
            Err(err) => {
                tracing::warn!(%recipient, error = %err, "distribution message failed");
                failures.push((recipient, err));
            },
        }
    }

    let recorded = storage.write(|tx| {
        for (recipient, err) in &failures {
            if *err == DirectSendError::Unregistered {
                mark_unregistered(tx, *recipient, thread_id, timestamp)?;
            }
        }
        if !receipts.is_empty() {
            store.record_delivered(tx, thread_id, distribution_id, &receipts, now_ms)?;
        }
        Ok::<_, SendError>(())
    });

    let mut outcome = DistributionOutcome {
        failed: failures
            .into_iter()
            .map(|(recipient, err)| {
                (recipient, SenderKeyError::RecipientDistributionFailed(err).into())
            })
            .collect(),
        ..DistributionOutcome::default()
    };

    let delivered = receipts.into_iter().map(|(recipient, _)| recipient);
    match recorded {
        Ok(()) => outcome.delivered.extend(delivered),
        Err(err) => {
            tracing::warn!(thread = %thread_id, error = %err, "failed to record distribution");
            outcome.failed.extend(delivered.map(|recipient| (recipient, err.clone())));
        },
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use sealcast_core::{
        AccessMode, DeviceId, GroupId, MemoryStorage, RecipientSendState, ThreadRecord,
    };
    use sealcast_crypto::{AccessKey, CryptoError};

    use super::*;

    #[derive(Clone, Default)]
    struct CountingEnv(Arc<AtomicU64>);

    impl Environment for CountingEnv {
        fn wall_clock_millis(&self) -> u64 {
            1_000
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            for byte in buffer {
                *byte = self.0.fetch_add(1, Ordering::SeqCst) as u8;
            }
        }
    }

    /// Answers from a fixed table.
    struct TableSender {
        answers: BTreeMap<ServiceId, Result<DistributionReceipt, DirectSendError>>,
    }

    #[async_trait]
    impl DirectSender for TableSender {
        async fn send_distribution(
            &self,
            send: DistributionSend,
        ) -> Result<DistributionReceipt, DirectSendError> {
            self.answers.get(&send.recipient).cloned().unwrap_or(Err(DirectSendError::Rejected {
                status: 500,
            }))
        }
    }

    const THREAD: ThreadId = ThreadId(3);

    fn id(n: u128) -> ServiceId {
        ServiceId::from_u128(n)
    }

    fn store() -> SenderKeyStore {
        SenderKeyStore::new(Duration::from_secs(3600), None)
    }

    fn receipt(device: u32, registration_id: u32) -> DistributionReceipt {
        DistributionReceipt { timestamp: 1, devices: vec![(DeviceId(device), registration_id)] }
    }

    fn prepared(storage: &MemoryStorage, recipients: &[ServiceId]) -> DistributionPlan {
        let env = CountingEnv::default();
        let message = OutgoingMessage::new(THREAD, 77, b"hi".to_vec());
        let credentials = recipients
            .iter()
            .map(|r| {
                (*r, SealedSenderAccess {
                    mode: AccessMode::Enabled,
                    key: AccessKey::from_bytes([2; 16]),
                })
            })
            .collect();

        storage
            .write(|tx| {
                tx.put_thread(&ThreadRecord {
                    thread_id: THREAD,
                    group_id: GroupId(vec![4; 32]),
                    members: recipients.iter().copied().collect(),
                })?;
                plan_distribution(tx, &store(), &env, recipients, &message, &credentials)
            })
            .unwrap()
    }

    #[test]
    fn plan_covers_everyone_on_a_fresh_epoch() {
        let storage = MemoryStorage::new();

        let plan = prepared(&storage, &[id(1), id(2)]);

        let planned: Vec<_> = plan.sends.iter().map(|s| s.recipient).collect();
        assert_eq!(planned, vec![id(1), id(2)]);
        assert!(plan.sends.iter().all(|s| s.on_behalf_of_timestamp == 77 && s.access.is_some()));
    }

    #[tokio::test]
    async fn failures_drop_out_and_unregistered_is_marked() {
        let storage = MemoryStorage::new();
        let plan = prepared(&storage, &[id(1), id(2), id(3)]);

        let direct = TableSender {
            answers: BTreeMap::from([
                (id(1), Ok(receipt(1, 11))),
                (id(2), Err(DirectSendError::Unregistered)),
                (id(3), Err(DirectSendError::Network("reset".into()))),
            ]),
        };

        let results = send_distributions(&direct, plan.sends).await;
        let outcome = record_distributions(
            &storage,
            &store(),
            THREAD,
            77,
            plan.distribution_id,
            results,
            5,
        );

        assert_eq!(outcome.delivered, vec![id(1)]);
        assert_eq!(outcome.failed, vec![
            (id(2), SendError::Distribution(DirectSendError::Unregistered)),
            (id(3), SendError::Distribution(DirectSendError::Network("reset".into()))),
        ]);

        storage
            .read(|tx| {
                let epoch = tx.sender_key(THREAD)?.unwrap();
                assert!(epoch.delivered.contains_key(&id(1)));
                assert!(!epoch.delivered.contains_key(&id(2)));
                assert!(!tx.recipient(id(2))?.unwrap().registered);
                let message = tx.message(THREAD, 77)?.unwrap();
                assert_eq!(message.recipients[&id(2)], RecipientSendState::Unregistered);
                Ok::<_, sealcast_core::StorageError>(())
            })
            .unwrap();

        let needing = storage
            .read(|tx| store().recipients_needing_epoch(tx, THREAD, &[id(1), id(2), id(3)]))
            .unwrap();
        assert_eq!(needing, [id(2), id(3)].into());
    }

    #[tokio::test]
    async fn rotated_epoch_demotes_every_delivery() {
        let storage = MemoryStorage::new();
        let plan = prepared(&storage, &[id(1), id(2)]);
        storage.write(|tx| tx.delete_sender_key(THREAD)).unwrap();

        let direct = TableSender {
            answers: BTreeMap::from([(id(1), Ok(receipt(1, 11))), (id(2), Ok(receipt(1, 12)))]),
        };
        let results = send_distributions(&direct, plan.sends).await;
        let outcome = record_distributions(
            &storage,
            &store(),
            THREAD,
            77,
            plan.distribution_id,
            results,
            5,
        );

        assert!(outcome.delivered.is_empty());
        let mismatch = SendError::Crypto(CryptoError::DistributionMismatch);
        assert_eq!(outcome.failed, vec![(id(1), mismatch.clone()), (id(2), mismatch)]);
    }

    #[tokio::test]
    async fn receipt_without_devices_is_a_failure() {
        let storage = MemoryStorage::new();
        let plan = prepared(&storage, &[id(1), id(2)]);

        let direct = TableSender {
            answers: BTreeMap::from([
                (id(1), Ok(receipt(1, 11))),
                (id(2), Ok(DistributionReceipt { timestamp: 1, devices: Vec::new() })),
            ]),
        };
        let results = send_distributions(&direct, plan.sends).await;
        let outcome = record_distributions(
            &storage,
            &store(),
            THREAD,
            77,
            plan.distribution_id,
            results,
            5,
        );

        assert_eq!(outcome.delivered, vec![id(1)]);
        assert_eq!(outcome.failed, vec![(
            id(2),
            SendError::Distribution(DirectSendError::NoDevices)
        )]);
        let needing = storage
            .read(|tx| store().recipients_needing_epoch(tx, THREAD, &[id(1), id(2)]))
            .unwrap();
        assert_eq!(needing, [id(2)].into());
    }
}
