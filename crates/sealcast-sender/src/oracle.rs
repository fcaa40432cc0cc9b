//! Session and registration lookups.
//!
//! Devices come from the recipient record; session validity from the
//! session records. Both are read fresh inside the caller's transaction.

use sealcast_core::{DeviceId, ProtocolAddress, ReadTxn, ServiceId, StorageError};
use sealcast_crypto::MAX_REGISTRATION_ID;

/// Usability of the 1:1 session(s) with a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    /// Current session with a registration id that fits the envelope header
    Valid,
    /// Registration id too wide for the envelope header, or unreadable
    /// session: the recipient must be sent to by fanout
    Invalid,
    /// No current session: the recipient needs a distribution message
    NoSession,
}

/// Known devices of `recipient`, in ascending order. Empty if unknown.
pub fn devices_for<T: ReadTxn + ?Sized>(
    tx: &T,
    recipient: ServiceId,
) -> Result<Vec<DeviceId>, StorageError> {
    Ok(tx
        .recipient(recipient)?
        .map(|record| record.devices.into_iter().collect())
        .unwrap_or_default())
}

/// Validity of the session with one device.
pub fn session_validity<T: ReadTxn + ?Sized>(
    tx: &T,
    address: ProtocolAddress,
) -> Result<SessionValidity, StorageError> {
    let session = match tx.session(address) {
        Ok(session) => session,
        Err(StorageError::Serialization(reason)) => {
            tracing::warn!(%address, %reason, "unreadable session record");
            return Ok(SessionValidity::Invalid);
        },
        Err(err) => return Err(err),
    };

    Ok(match session {
        Some(session) if session.has_current_state => {
            if session.remote_registration_id <= MAX_REGISTRATION_ID {
                SessionValidity::Valid
            } else {
                SessionValidity::Invalid
            }
        },
        _ => SessionValidity::NoSession,
    })
}

/// Combined validity over every device of `recipient`.
///
/// Devices are checked in order and the first non-valid device decides.
pub fn registration_status<T: ReadTxn + ?Sized>(
    tx: &T,
    recipient: ServiceId,
) -> Result<SessionValidity, StorageError> {
    for device_id in devices_for(tx, recipient)? {
        match session_validity(tx, ProtocolAddress::new(recipient, device_id))? {
            SessionValidity::Valid => {},
            other => return Ok(other),
        }
    }
    Ok(SessionValidity::Valid)
}

#[cfg(test)]
mod tests {
    use sealcast_core::{MemoryStorage, RecipientRecord, SessionRecord, Storage};

    use super::*;

    fn storage_with(devices: &[(u32, Option<SessionRecord>)]) -> (MemoryStorage, ServiceId) {
        let storage = MemoryStorage::new();
        let bob = ServiceId::from_u128(0xb0b);

        storage
            .write(|tx| {
                tx.put_recipient(&RecipientRecord::new(
                    bob,
                    devices.iter().map(|(d, _)| DeviceId(*d)),
                ))?;
                for (device, session) in devices {
                    if let Some(session) = session {
                        tx.put_session(ProtocolAddress::new(bob, DeviceId(*device)), session)?;
                    }
                }
                Ok::<_, StorageError>(())
            })
            .unwrap();

        (storage, bob)
    }

    #[test]
    fn all_current_sessions_are_valid() {
        let (storage, bob) = storage_with(&[
            (1, Some(SessionRecord::current(10))),
            (2, Some(SessionRecord::current(MAX_REGISTRATION_ID))),
        ]);

        let status = storage.read(|tx| registration_status(tx, bob)).unwrap();
        assert_eq!(status, SessionValidity::Valid);
    }

    #[test]
    fn oversized_registration_id_is_invalid() {
        let (storage, bob) = storage_with(&[
            (1, Some(SessionRecord::current(10))),
            (2, Some(SessionRecord::current(MAX_REGISTRATION_ID + 1))),
        ]);

        let status = storage.read(|tx| registration_status(tx, bob)).unwrap();
        assert_eq!(status, SessionValidity::Invalid);
    }

    #[test]
    fn missing_or_archived_session_needs_distribution() {
        let archived = SessionRecord { remote_registration_id: 5, has_current_state: false };
        let (storage, bob) = storage_with(&[(1, Some(archived)), (2, None)]);

        let status = storage.read(|tx| registration_status(tx, bob)).unwrap();
        assert_eq!(status, SessionValidity::NoSession);
    }

    #[test]
    fn first_bad_device_decides() {
        let (storage, bob) = storage_with(&[
            (1, None),
            (2, Some(SessionRecord::current(MAX_REGISTRATION_ID + 1))),
        ]);

        let status = storage.read(|tx| registration_status(tx, bob)).unwrap();
        assert_eq!(status, SessionValidity::NoSession);
    }

    #[test]
    fn unknown_recipient_has_no_devices() {
        let storage = MemoryStorage::new();
        let devices = storage.read(|tx| devices_for(tx, ServiceId::from_u128(9))).unwrap();
        assert!(devices.is_empty());
    }
}
