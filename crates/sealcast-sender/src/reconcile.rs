//! Writing server answers back into storage.
//!
//! Every function here runs inside a write transaction the caller owns.

use sealcast_core::{
    DeviceId, MessageRecord, PendingDelivery, ProtocolAddress, RecipientRecord,
    RecipientSendState, ServiceId, StorageError, ThreadId, WriteTxn,
};

use crate::response::{MismatchedDevices, StaleDevices};

/// Mark `recipient` unregistered, globally and for one message.
pub fn mark_unregistered(
    tx: &mut dyn WriteTxn,
    recipient: ServiceId,
    thread_id: ThreadId,
    timestamp: u64,
) -> Result<(), StorageError> {
    let mut record =
        tx.recipient(recipient)?.unwrap_or_else(|| RecipientRecord::new(recipient, []));
    record.registered = false;
    tx.put_recipient(&record)?;

    set_send_state(tx, thread_id, timestamp, recipient, RecipientSendState::Unregistered)
}

/// Apply 409 corrections: add missing devices, drop extra ones along with
/// their sessions.
pub fn apply_device_corrections(
    tx: &mut dyn WriteTxn,
    accounts: &[MismatchedDevices],
) -> Result<(), StorageError> {
    for account in accounts {
        let mut record = tx
            .recipient(account.service_id)?
            .unwrap_or_else(|| RecipientRecord::new(account.service_id, []));

        record.devices.extend(account.devices.missing_devices.iter().copied());
        for &device_id in &account.devices.extra_devices {
            record.devices.remove(&device_id);
            tx.delete_session(ProtocolAddress::new(account.service_id, device_id))?;
        }
        tx.put_recipient(&record)?;

        tracing::info!(
            recipient = %account.service_id,
            added = account.devices.missing_devices.len(),
            removed = account.devices.extra_devices.len(),
            "corrected device list"
        );
    }
    Ok(())
}

/// Apply 410 corrections: archive the sessions of stale devices.
///
/// Archived sessions read as "no session", so the next attempt sends those
/// recipients a fresh distribution message.
pub fn archive_stale_sessions(
    tx: &mut dyn WriteTxn,
    accounts: &[StaleDevices],
) -> Result<(), StorageError> {
    for account in accounts {
        for &device_id in &account.devices.stale_devices {
            let address = ProtocolAddress::new(account.service_id, device_id);
            if let Some(mut session) = tx.session(address)? {
                session.has_current_state = false;
                tx.put_session(address, &session)?;
            }
        }
        tracing::info!(
            recipient = %account.service_id,
            stale = account.devices.stale_devices.len(),
            "archived stale sessions"
        );
    }
    Ok(())
}

/// Record a delivered shared send for one recipient.
///
/// The recipient is marked sent with sealed delivery; a non-story 200 also
/// proves the account is registered. With a resend payload, one pending
/// delivery is recorded per addressed device.
pub fn record_shared_delivery(
    tx: &mut dyn WriteTxn,
    recipient: ServiceId,
    devices: &[DeviceId],
    thread_id: ThreadId,
    timestamp: u64,
    payload_id: Option<u64>,
    is_story: bool,
) -> Result<(), StorageError> {
    set_send_state(tx, thread_id, timestamp, recipient, RecipientSendState::Sent {
        sealed_sender: true,
    })?;

    if !is_story {
        let mut record =
            tx.recipient(recipient)?.unwrap_or_else(|| RecipientRecord::new(recipient, []));
        if !record.registered {
            record.registered = true;
            tx.put_recipient(&record)?;
        }
    }

    if let Some(payload_id) = payload_id {
        for &device_id in devices {
            tx.put_pending_delivery(&PendingDelivery {
                payload_id,
                recipient,
                device_id,
                message_timestamp: timestamp,
            })?;
        }
    }
    Ok(())
}

fn set_send_state(
    tx: &mut dyn WriteTxn,
    thread_id: ThreadId,
    timestamp: u64,
    recipient: ServiceId,
    state: RecipientSendState,
) -> Result<(), StorageError> {
    let mut message = tx
        .message(thread_id, timestamp)?
        .unwrap_or_else(|| MessageRecord::new(thread_id, timestamp));
    message.recipients.insert(recipient, state);
    tx.put_message(&message)
}

#[cfg(test)]
mod tests {
    use sealcast_core::{MemoryStorage, SessionRecord, Storage};

    use super::*;
    use crate::response::{DeviceMismatch, StaleDeviceSet};

    const THREAD: ThreadId = ThreadId(8);

    fn bob() -> ServiceId {
        ServiceId::from_u128(0xb0b)
    }

    fn address(device: u32) -> ProtocolAddress {
        ProtocolAddress::new(bob(), DeviceId(device))
    }

    fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .write(|tx| {
                tx.put_recipient(&RecipientRecord::new(bob(), [DeviceId(1), DeviceId(2)]))?;
                tx.put_session(address(1), &SessionRecord::current(10))?;
                tx.put_session(address(2), &SessionRecord::current(20))
            })
            .unwrap();
        storage
    }

    #[test]
    fn device_corrections_add_and_remove() {
        let storage = seeded();
        let accounts = [MismatchedDevices {
            service_id: bob(),
            devices: DeviceMismatch {
                missing_devices: vec![DeviceId(3)],
                extra_devices: vec![DeviceId(2)],
            },
        }];

        storage.write(|tx| apply_device_corrections(tx, &accounts)).unwrap();

        storage
            .read(|tx| {
                let record = tx.recipient(bob())?.unwrap();
                assert_eq!(record.devices, [DeviceId(1), DeviceId(3)].into());
                assert_eq!(tx.session(address(2))?, None);
                assert!(tx.session(address(1))?.is_some());
                Ok::<_, StorageError>(())
            })
            .unwrap();
    }

    #[test]
    fn stale_sessions_are_archived_not_deleted() {
        let storage = seeded();
        let accounts = [StaleDevices {
            service_id: bob(),
            devices: StaleDeviceSet { stale_devices: vec![DeviceId(1), DeviceId(9)] },
        }];

        storage.write(|tx| archive_stale_sessions(tx, &accounts)).unwrap();

        storage
            .read(|tx| {
                let session = tx.session(address(1))?.unwrap();
                assert!(!session.has_current_state);
                assert_eq!(session.remote_registration_id, 10);
                assert!(tx.session(address(2))?.unwrap().has_current_state);
                assert_eq!(tx.session(address(9))?, None);
                Ok::<_, StorageError>(())
            })
            .unwrap();
    }

    #[test]
    fn shared_delivery_records_state_and_pending_deliveries() {
        let storage = seeded();
        storage.write(|tx| mark_unregistered(tx, bob(), THREAD, 1)).unwrap();

        storage
            .write(|tx| {
                record_shared_delivery(
                    tx,
                    bob(),
                    &[DeviceId(1), DeviceId(2)],
                    THREAD,
                    2,
                    Some(40),
                    false,
                )
            })
            .unwrap();

        storage
            .read(|tx| {
                assert!(tx.recipient(bob())?.unwrap().registered);
                let message = tx.message(THREAD, 2)?.unwrap();
                assert_eq!(message.recipients[&bob()], RecipientSendState::Sent {
                    sealed_sender: true
                });
                let pending = tx.pending_deliveries(40)?;
                assert_eq!(pending.len(), 2);
                assert!(pending.iter().all(|p| p.message_timestamp == 2 && p.recipient == bob()));
                Ok::<_, StorageError>(())
            })
            .unwrap();
    }

    #[test]
    fn story_delivery_does_not_prove_registration() {
        let storage = seeded();
        storage.write(|tx| mark_unregistered(tx, bob(), THREAD, 1)).unwrap();

        storage
            .write(|tx| record_shared_delivery(tx, bob(), &[DeviceId(1)], THREAD, 2, None, true))
            .unwrap();

        storage
            .read(|tx| {
                assert!(!tx.recipient(bob())?.unwrap().registered);
                assert!(tx.pending_deliveries(40)?.is_empty());
                Ok::<_, StorageError>(())
            })
            .unwrap();
    }
}
