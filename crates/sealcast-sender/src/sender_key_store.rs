//! Sender-key epoch management.
//!
//! One epoch per thread, kept in storage as a [`SenderKeyRecord`]. Every
//! operation runs inside the caller's transaction so that "does this device
//! have the epoch" is read and written atomically with the rest of a send.
//!
//! # Invariants
//!
//! - A recipient's devices are recorded as delivered only from a
//!   [`DistributionReceipt`] for the current distribution id
//! - The chain only moves forward; every group encryption persists the
//!   advanced chain and bumps the use count in the same transaction

use std::{collections::BTreeSet, time::Duration};

use sealcast_core::{
    DeliveredDevices, Environment, ProtocolAddress, ReadTxn, RecipientRecord, SenderKeyRecord,
    ServiceId, SessionRecord, StorageError, ThreadId, ThreadRecord, WriteTxn,
};
use sealcast_crypto::{
    CryptoError, DistributionId, NONCE_RANDOM_SIZE, SenderChain, SenderKeyDistributionMessage,
    SenderKeyMessage, derive_chain_seed, encrypt_group_message,
};

use crate::{error::SendError, oracle::devices_for, transport::DistributionReceipt};

/// Epoch lifecycle rules.
#[derive(Debug, Clone, Copy)]
pub struct SenderKeyStore {
    max_age: Duration,
    max_uses: Option<u64>,
}

impl SenderKeyStore {
    /// Store rotating epochs after `max_age` or `max_uses` messages.
    pub fn new(max_age: Duration, max_uses: Option<u64>) -> Self {
        Self { max_age, max_uses }
    }

    /// Drop the thread's epoch if it must not be used any more.
    ///
    /// An epoch expires when it is older than the maximum age, has reached
    /// the use limit, or was delivered to someone who is no longer a member
    /// (a removed member must not read future messages).
    ///
    /// Returns whether an epoch was dropped.
    pub fn expire_if_necessary(
        &self,
        tx: &mut dyn WriteTxn,
        thread: &ThreadRecord,
        now_ms: u64,
    ) -> Result<bool, StorageError> {
        let Some(record) = tx.sender_key(thread.thread_id)? else {
            return Ok(false);
        };

        let age = Duration::from_millis(now_ms.saturating_sub(record.created_at_ms));
        let too_old = age >= self.max_age;
        let used_up = self.max_uses.is_some_and(|max| record.use_count >= max);
        let removed_member = record.delivered.keys().any(|member| !thread.is_member(member));

        if !(too_old || used_up || removed_member) {
            return Ok(false);
        }

        tracing::info!(
            thread = %thread.thread_id,
            distribution_id = %record.distribution_id,
            too_old,
            used_up,
            removed_member,
            "rotating sender key"
        );
        tx.delete_sender_key(thread.thread_id)?;
        Ok(true)
    }

    /// The thread's epoch, creating a fresh one if there is none.
    pub fn current_or_create<E: Environment>(
        &self,
        tx: &mut dyn WriteTxn,
        thread_id: ThreadId,
        env: &E,
    ) -> Result<SenderKeyRecord, StorageError> {
        if let Some(record) = tx.sender_key(thread_id)? {
            return Ok(record);
        }

        let distribution_id = DistributionId::from_bytes(env.random_array());
        let epoch_seed: [u8; 32] = env.random_array();
        let chain = SenderChain::new(&derive_chain_seed(&epoch_seed, &distribution_id));

        let record = SenderKeyRecord {
            distribution_id,
            created_at_ms: env.wall_clock_millis(),
            use_count: 0,
            chain: chain.state(),
            delivered: Default::default(),
        };
        tx.put_sender_key(thread_id, &record)?;

        tracing::debug!(thread = %thread_id, %distribution_id, "created sender key");
        Ok(record)
    }

    /// Recipients that must be sent the current epoch before they can read a
    /// shared ciphertext.
    ///
    /// A recipient needs it when there is no epoch at all, when nothing was
    /// delivered to it, when one of its current devices did not receive it,
    /// or when a device's session changed registration id since delivery.
    pub fn recipients_needing_epoch<T: ReadTxn + ?Sized>(
        &self,
        tx: &T,
        thread_id: ThreadId,
        recipients: &[ServiceId],
    ) -> Result<BTreeSet<ServiceId>, StorageError> {
        let Some(record) = tx.sender_key(thread_id)? else {
            return Ok(recipients.iter().copied().collect());
        };

        let mut needing = BTreeSet::new();
        for &recipient in recipients {
            let Some(delivered) = record.delivered.get(&recipient) else {
                needing.insert(recipient);
                continue;
            };

            for device_id in devices_for(tx, recipient)? {
                let Some(&registration_id) = delivered.devices.get(&device_id) else {
                    needing.insert(recipient);
                    break;
                };

                let session = tx.session(ProtocolAddress::new(recipient, device_id))?;
                let unchanged = session.is_some_and(|s| {
                    s.has_current_state && s.remote_registration_id == registration_id
                });
                if !unchanged {
                    needing.insert(recipient);
                    break;
                }
            }
        }
        Ok(needing)
    }

    /// Serialized distribution message for the epoch's current chain.
    pub fn distribution_payload(&self, record: &SenderKeyRecord) -> Result<Vec<u8>, CryptoError> {
        SenderKeyDistributionMessage {
            distribution_id: record.distribution_id,
            chain: record.chain.clone(),
        }
        .to_bytes()
    }

    /// Record delivered distribution messages.
    ///
    /// Each receipt also refreshes the recipient's device list and sessions,
    /// since the 1:1 path that produced it resolved both against the server.
    /// A receipt naming no devices records nothing.
    ///
    /// # Errors
    ///
    /// `DistributionMismatch` if the thread's epoch is gone or was rotated
    /// after the messages were prepared; nothing is recorded then.
    pub fn record_delivered(
        &self,
        tx: &mut dyn WriteTxn,
        thread_id: ThreadId,
        distribution_id: DistributionId,
        receipts: &[(ServiceId, DistributionReceipt)],
        now_ms: u64,
    ) -> Result<(), SendError> {
        let mut record = match tx.sender_key(thread_id)? {
            Some(record) if record.distribution_id == distribution_id => record,
            _ => return Err(CryptoError::DistributionMismatch.into()),
        };

        for (recipient, receipt) in receipts {
            if receipt.devices.is_empty() {
                tracing::warn!(%recipient, "distribution receipt names no devices");
                continue;
            }

            record.delivered.insert(
                *recipient,
                DeliveredDevices {
                    devices: receipt.devices.iter().copied().collect(),
                    delivered_at_ms: now_ms,
                },
            );

            let mut recipient_record = tx
                .recipient(*recipient)?
                .unwrap_or_else(|| RecipientRecord::new(*recipient, []));
            recipient_record.devices = receipt.devices.iter().map(|(device, _)| *device).collect();
            recipient_record.registered = true;
            tx.put_recipient(&recipient_record)?;

            for &(device_id, registration_id) in &receipt.devices {
                tx.put_session(
                    ProtocolAddress::new(*recipient, device_id),
                    &SessionRecord::current(registration_id),
                )?;
            }
        }

        tx.put_sender_key(thread_id, &record)?;
        Ok(())
    }

    /// Encrypt a padded body under the thread's epoch, persisting the
    /// advanced chain.
    pub fn encrypt(
        &self,
        tx: &mut dyn WriteTxn,
        thread_id: ThreadId,
        group_id: &[u8],
        padded_plaintext: &[u8],
        random_suffix: [u8; NONCE_RANDOM_SIZE],
    ) -> Result<SenderKeyMessage, SendError> {
        let mut record = tx.sender_key(thread_id)?.ok_or_else(|| StorageError::NotFound {
            what: "sender key",
            key: thread_id.to_string(),
        })?;

        let mut chain = SenderChain::from_state(&record.chain);
        let message = encrypt_group_message(
            &mut chain,
            record.distribution_id,
            group_id,
            padded_plaintext,
            random_suffix,
        )?;

        record.chain = chain.state();
        record.use_count += 1;
        tx.put_sender_key(thread_id, &record)?;

        Ok(message)
    }
}
