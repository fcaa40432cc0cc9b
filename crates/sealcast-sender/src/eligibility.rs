//! Which recipients may take the shared path.

use std::collections::{BTreeMap, BTreeSet};

use sealcast_core::{ReadTxn, SealedSenderAccess, ServiceId, StorageError, ThreadRecord};

use crate::oracle::{SessionValidity, registration_status};

/// Outcome of [`filter_eligible`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eligibility {
    /// Recipients that may receive the shared ciphertext, in request order
    pub eligible: Vec<ServiceId>,
    /// Everyone else; the caller must fan out to them
    pub excluded: Vec<ServiceId>,
}

/// Split `recipients` by shared-path eligibility.
///
/// A recipient is eligible when it is a current member of the thread, has a
/// credential allowing sealed delivery, is not the local account, and its
/// sessions are not invalid. A missing session does not exclude: the
/// distribution step builds one. Duplicates are dropped.
pub fn filter_eligible<T: ReadTxn + ?Sized>(
    tx: &T,
    thread: &ThreadRecord,
    recipients: &[ServiceId],
    credentials: &BTreeMap<ServiceId, SealedSenderAccess>,
    local_account: ServiceId,
) -> Result<Eligibility, StorageError> {
    let mut seen = BTreeSet::new();
    let mut result = Eligibility::default();

    for &recipient in recipients {
        if !seen.insert(recipient) {
            continue;
        }

        if is_eligible(tx, thread, recipient, credentials, local_account)? {
            result.eligible.push(recipient);
        } else {
            result.excluded.push(recipient);
        }
    }

    Ok(result)
}

fn is_eligible<T: ReadTxn + ?Sized>(
    tx: &T,
    thread: &ThreadRecord,
    recipient: ServiceId,
    credentials: &BTreeMap<ServiceId, SealedSenderAccess>,
    local_account: ServiceId,
) -> Result<bool, StorageError> {
    if recipient == local_account {
        tracing::error!(thread = %thread.thread_id, "local account passed as a recipient");
        return Ok(false);
    }

    if !thread.is_member(&recipient) {
        return Ok(false);
    }

    let sealed = credentials.get(&recipient).is_some_and(|c| c.mode.allows_sealed_delivery());
    if !sealed {
        return Ok(false);
    }

    Ok(registration_status(tx, recipient)? != SessionValidity::Invalid)
}
