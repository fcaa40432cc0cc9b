//! Building the shared ciphertext.
//!
//! Recipients, devices, registration ids and the composite access key all
//! come from one snapshot inside one write transaction. The chain advance is
//! part of that same transaction, so a build that fails (oversize envelope,
//! missing key) leaves the epoch untouched.
//!
//! The body is only encrypted under the epoch the send was prepared for, and
//! only when every addressed recipient is recorded as holding it. A send that
//! raced a rotation fails with `MustRebuild` and is prepared again.

use std::collections::BTreeMap;

use sealcast_core::{
    DeviceId, Environment, OutgoingMessage, ProtocolAddress, SealedSenderAccess, ServiceId,
    StorageError, WriteTxn,
};
use sealcast_crypto::{
    DistributionId, EnvelopeRecipient, MultiRecipientEnvelope, composite_access_key,
    pad_message_body,
};

use crate::{
    error::{SendError, SenderKeyError},
    oracle::devices_for,
    sender_key_store::SenderKeyStore,
    transport::MultiRecipientRequest,
};

/// A request ready to submit, plus who it addresses.
#[derive(Debug, Clone)]
pub(crate) struct SharedCiphertext {
    /// The request
    pub request: MultiRecipientRequest,
    /// Addressed devices per recipient, in recipient order
    pub addressed: Vec<(ServiceId, Vec<DeviceId>)>,
}

/// Encrypt `message` once for every device of `recipients` under the epoch
/// `distribution_id`.
#[allow(clippy::too_many_arguments, reason = "one snapshot, every input explicit")]
pub(crate) fn build_shared_ciphertext<E: Environment>(
    tx: &mut dyn WriteTxn,
    store: &SenderKeyStore,
    env: &E,
    message: &OutgoingMessage,
    distribution_id: DistributionId,
    recipients: &[ServiceId],
    credentials: &BTreeMap<ServiceId, SealedSenderAccess>,
    max_envelope_size: usize,
) -> Result<SharedCiphertext, SendError> {
    let thread_id = message.thread_id;
    let thread = tx
        .thread(thread_id)?
        .ok_or_else(|| StorageError::NotFound { what: "thread", key: thread_id.to_string() })?;

    let current = tx.sender_key(thread_id)?.map(|record| record.distribution_id);
    if current != Some(distribution_id) {
        tracing::warn!(thread = %thread_id, %distribution_id, "sender key rotated since prepare");
        return Err(SenderKeyError::EpochRotated.into());
    }

    if message.envelope_group_id.as_ref().is_some_and(|group| *group != thread.group_id) {
        tracing::error!(thread = %thread_id, "message group id differs from thread group id");
    }

    let access_keys = recipients
        .iter()
        .map(|recipient| {
            credentials
                .get(recipient)
                .map(SealedSenderAccess::composite_component)
                .ok_or(SenderKeyError::IncompleteAccessKeys(*recipient))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let access_key = composite_access_key(access_keys)?;

    let mut addressed = Vec::with_capacity(recipients.len());
    let mut envelope_recipients = Vec::new();
    for &recipient in recipients {
        let devices = devices_for(&*tx, recipient)?;
        for &device_id in &devices {
            let address = ProtocolAddress::new(recipient, device_id);
            let session = tx
                .session(address)?
                .filter(|session| session.has_current_state)
                .ok_or(SenderKeyError::MissingSession(address))?;

            envelope_recipients.push(EnvelopeRecipient {
                service_id: *recipient.as_bytes(),
                device_id: device_id.0,
                registration_id: session.remote_registration_id,
            });
        }
        addressed.push((recipient, devices));
    }

    let needing = store.recipients_needing_epoch(&*tx, thread_id, recipients)?;
    if let Some(&recipient) = needing.first() {
        tracing::warn!(
            thread = %thread_id,
            %recipient,
            needing = needing.len(),
            "recipient does not hold the sender key"
        );
        return Err(SenderKeyError::EpochNotDelivered(recipient).into());
    }

    let group_message = store.encrypt(
        tx,
        thread_id,
        thread.group_id.as_bytes(),
        &pad_message_body(&message.body),
        env.random_array(),
    )?;

    let envelope = MultiRecipientEnvelope {
        recipients: envelope_recipients,
        group_id: thread.group_id.0,
        content_hint: message.content_hint.wire_value(),
        message: group_message,
    }
    .encode()?;

    if envelope.len() > max_envelope_size {
        tracing::error!(
            thread = %thread_id,
            size = envelope.len(),
            limit = max_envelope_size,
            "shared ciphertext too large"
        );
        return Err(SenderKeyError::OversizeMessage {
            size: envelope.len(),
            limit: max_envelope_size,
        }
        .into());
    }

    Ok(SharedCiphertext {
        request: MultiRecipientRequest {
            envelope,
            access_key,
            timestamp: message.timestamp,
            online: message.is_online,
            urgent: message.is_urgent,
            story: message.is_story,
        },
        addressed,
    })
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

    use sealcast_core::{
        AccessMode, GroupId, MemoryStorage, RecipientRecord, SenderKeyRecord,
        SessionRecord, Storage, ThreadId, ThreadRecord,
    };
    use sealcast_crypto::{AccessKey, SenderChain, decrypt_group_message, unpad_message_body};

    use super::*;
    use crate::transport::DistributionReceipt;

    #[derive(Clone, Default)]
    struct CountingEnv(Arc<AtomicU64>);

    impl Environment for CountingEnv {
        fn wall_clock_millis(&self) -> u64 {
            0
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            for byte in buffer {
                *byte = self.0.fetch_add(1, Ordering::SeqCst) as u8;
            }
        }
    }

    const THREAD: ThreadId = ThreadId(12);

    fn id(n: u128) -> ServiceId {
        ServiceId::from_u128(n)
    }

    fn store() -> SenderKeyStore {
        SenderKeyStore::new(Duration::from_secs(3600), None)
    }

    fn credentials() -> BTreeMap<ServiceId, SealedSenderAccess> {
        BTreeMap::from([
            (id(1), SealedSenderAccess {
                mode: AccessMode::Enabled,
                key: AccessKey::from_bytes([0x0f; 16]),
            }),
            (id(2), SealedSenderAccess {
                mode: AccessMode::Enabled,
                key: AccessKey::from_bytes([0xf0; 16]),
            }),
            (id(3), SealedSenderAccess {
                mode: AccessMode::Unrestricted,
                key: AccessKey::from_bytes([0x77; 16]),
            }),
        ])
    }

    fn world(env: &CountingEnv) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .write(|tx| {
                tx.put_thread(&ThreadRecord {
                    thread_id: THREAD,
                    group_id: GroupId(vec![5; 32]),
                    members: [id(1), id(2), id(3)].into(),
                })?;
                let mut receipts = Vec::new();
                for n in 1..=3 {
                    tx.put_recipient(&RecipientRecord::new(id(n), [DeviceId(1), DeviceId(2)]))?;
                    let mut devices = Vec::new();
                    for device in 1..=2 {
                        let registration_id = (n as u32) * 10 + device;
                        tx.put_session(
                            ProtocolAddress::new(id(n), DeviceId(device)),
                            &SessionRecord::current(registration_id),
                        )?;
                        devices.push((DeviceId(device), registration_id));
                    }
                    receipts.push((id(n), DistributionReceipt { timestamp: 1, devices }));
                }
                let epoch = store().current_or_create(tx, THREAD, env)?;
                store().record_delivered(tx, THREAD, epoch.distribution_id, &receipts, 0)
            })
            .unwrap();
        storage
    }

    fn current_epoch(storage: &MemoryStorage) -> SenderKeyRecord {
        storage.read(|tx| tx.sender_key(THREAD)).unwrap().unwrap()
    }

    fn build(
        storage: &MemoryStorage,
        env: &CountingEnv,
        recipients: &[ServiceId],
        max: usize,
    ) -> Result<SharedCiphertext, SendError> {
        build_under(storage, env, current_epoch(storage).distribution_id, recipients, max)
    }

    fn build_under(
        storage: &MemoryStorage,
        env: &CountingEnv,
        distribution_id: DistributionId,
        recipients: &[ServiceId],
        max: usize,
    ) -> Result<SharedCiphertext, SendError> {
        let message = OutgoingMessage::new(THREAD, 9, b"shared body".to_vec());
        storage.write(|tx| {
            build_shared_ciphertext(
                tx,
                &store(),
                env,
                &message,
                distribution_id,
                recipients,
                &credentials(),
                max,
            )
        })
    }

    #[test]
    fn envelope_addresses_every_device_and_decrypts() {
        let env = CountingEnv::default();
        let storage = world(&env);
        let epoch = current_epoch(&storage);

        let shared = build(&storage, &env, &[id(1), id(2), id(3)], 256 * 1024).unwrap();

        let envelope = MultiRecipientEnvelope::decode(&shared.request.envelope).unwrap();
        assert_eq!(envelope.recipients.len(), 6);
        assert!(envelope.recipients.iter().any(|r| r.service_id == *id(2).as_bytes()
            && r.device_id == 2
            && r.registration_id == 22));
        assert_eq!(envelope.group_id, vec![5; 32]);

        let mut chain = SenderChain::from_state(&epoch.chain);
        let padded = decrypt_group_message(
            &mut chain,
            epoch.distribution_id,
            &envelope.group_id,
            &envelope.message,
        )
        .unwrap();
        assert_eq!(unpad_message_body(&padded).unwrap(), b"shared body");

        // 0x0f ^ 0xf0, unrestricted contributes zero
        assert_eq!(shared.request.access_key, AccessKey::from_bytes([0xff; 16]));
        assert_eq!(shared.addressed.len(), 3);
    }

    #[test]
    fn missing_access_key_fails_before_encrypting() {
        let env = CountingEnv::default();
        let storage = world(&env);

        let err = build(&storage, &env, &[id(1), id(4)], 256 * 1024).unwrap_err();

        assert_eq!(
            err,
            SendError::FastPathUnavailable(SenderKeyError::IncompleteAccessKeys(id(4)))
        );
        assert_eq!(current_epoch(&storage).use_count, 0);
    }

    #[test]
    fn oversize_envelope_rolls_back_chain() {
        let env = CountingEnv::default();
        let storage = world(&env);

        let err = build(&storage, &env, &[id(1), id(2)], 64).unwrap_err();

        assert!(matches!(
            err,
            SendError::FastPathUnavailable(SenderKeyError::OversizeMessage { limit: 64, .. })
        ));
        assert_eq!(current_epoch(&storage).chain.iteration, 0);
    }

    #[test]
    fn archived_session_is_reported() {
        let env = CountingEnv::default();
        let storage = world(&env);
        let address = ProtocolAddress::new(id(2), DeviceId(1));
        storage
            .write(|tx| {
                tx.put_session(address, &SessionRecord {
                    remote_registration_id: 21,
                    has_current_state: false,
                })
            })
            .unwrap();

        let err = build(&storage, &env, &[id(1), id(2)], 256 * 1024).unwrap_err();

        assert_eq!(err, SendError::FastPathUnavailable(SenderKeyError::MissingSession(address)));
    }

    #[test]
    fn rotated_epoch_is_never_encrypted_under() {
        let env = CountingEnv::default();
        let storage = world(&env);
        let prepared = current_epoch(&storage).distribution_id;
        let rotated = storage
            .write(|tx| {
                tx.delete_sender_key(THREAD)?;
                store().current_or_create(tx, THREAD, &env)
            })
            .unwrap();

        let err = build_under(&storage, &env, prepared, &[id(1), id(2)], 256 * 1024).unwrap_err();

        assert_eq!(err, SendError::MustRebuild(SenderKeyError::EpochRotated));
        let current = current_epoch(&storage);
        assert_eq!(current.distribution_id, rotated.distribution_id);
        assert_eq!(current.chain.iteration, 0);
        assert_eq!(current.use_count, 0);
    }

    #[test]
    fn recipient_missing_the_epoch_is_refused() {
        let env = CountingEnv::default();
        let storage = world(&env);
        storage
            .write(|tx| {
                let mut record = tx.recipient(id(3))?.unwrap();
                record.devices.insert(DeviceId(3));
                tx.put_recipient(&record)?;
                tx.put_session(
                    ProtocolAddress::new(id(3), DeviceId(3)),
                    &SessionRecord::current(33),
                )
            })
            .unwrap();

        let err = build(&storage, &env, &[id(1), id(3)], 256 * 1024).unwrap_err();

        assert_eq!(err, SendError::MustRebuild(SenderKeyError::EpochNotDelivered(id(3))));
        assert_eq!(current_epoch(&storage).chain.iteration, 0);
    }
}
