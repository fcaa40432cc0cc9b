//! The shared-send pipeline.
//!
//! ```text
//! prepare_shared_send                      (one write transaction)
//!   expire epoch ─► eligibility ─► ensure epoch ─► plan distribution
//!
//! SharedSendPlan::execute
//!   distribute (concurrent, joined) ─► record distribution
//!     ─► build shared ciphertext        (one write transaction)
//!     ─► submit ─► reconcile            (one write transaction)
//! ```
//!
//! The ciphertext is built strictly after the distribution join, from the
//! recipients that survived it, and only under the epoch they were prepared
//! and distributed for.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use sealcast_core::{
    DeviceId, Environment, OutgoingMessage, SealedSenderAccess, ServiceId, Storage, StorageError,
};
use tokio_util::sync::CancellationToken;

use crate::{
    builder::build_shared_ciphertext,
    config::SenderConfig,
    distribution::{DistributionPlan, plan_distribution, record_distributions, send_distributions},
    eligibility::filter_eligible,
    error::SendError,
    orchestrator::{Accepted, Orchestrator},
    reconcile::{mark_unregistered, record_shared_delivery},
    sender_key_store::SenderKeyStore,
    transport::{ChallengeResolver, DirectSender, Transport},
};

/// Shared-ciphertext sender for one local account.
///
/// Cheap to clone; clones share storage and collaborators.
#[derive(Clone)]
pub struct SharedSender<S, E> {
    storage: S,
    env: E,
    transport: Arc<dyn Transport>,
    direct: Arc<dyn DirectSender>,
    challenges: Arc<dyn ChallengeResolver>,
    local_account: ServiceId,
    config: SenderConfig,
    store: SenderKeyStore,
}

/// Result of [`SharedSender::prepare_shared_send`].
pub struct PreparedSharedSend<S, E> {
    /// Recipients the shared path will attempt. Everyone else needs fanout
    /// now.
    pub ready_recipients: Vec<ServiceId>,
    /// The deferred send; `None` when the shared path is not viable and
    /// every recipient must be fanned out.
    pub execute: Option<SharedSendPlan<S, E>>,
}

impl<S, E> PreparedSharedSend<S, E> {
    fn fanout() -> Self {
        Self { ready_recipients: Vec::new(), execute: None }
    }
}

/// A prepared shared send, run with [`execute`](Self::execute).
pub struct SharedSendPlan<S, E> {
    sender: SharedSender<S, E>,
    message: OutgoingMessage,
    credentials: BTreeMap<ServiceId, SealedSenderAccess>,
    eligible: Vec<ServiceId>,
    excluded: Vec<ServiceId>,
    distribution: DistributionPlan,
    cancel: CancellationToken,
}

impl<S: Storage, E: Environment> SharedSender<S, E> {
    /// Create a sender for `local_account`.
    pub fn new(
        storage: S,
        env: E,
        transport: Arc<dyn Transport>,
        direct: Arc<dyn DirectSender>,
        challenges: Arc<dyn ChallengeResolver>,
        local_account: ServiceId,
        config: SenderConfig,
    ) -> Self {
        let store = SenderKeyStore::new(config.epoch_max_age, config.epoch_max_uses);
        Self { storage, env, transport, direct, challenges, local_account, config, store }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Storage in use.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Decide which of `recipients` take the shared path for `message`.
    ///
    /// Rotates the thread's epoch if it expired, filters eligibility and
    /// plans distribution, all in one write transaction. Any failure here
    /// (or fewer than [`SenderConfig::min_recipients`] eligible recipients)
    /// yields no plan: the caller fans out to everyone.
    pub fn prepare_shared_send(
        &self,
        recipients: &[ServiceId],
        message: &OutgoingMessage,
        credentials: &BTreeMap<ServiceId, SealedSenderAccess>,
        cancel: &CancellationToken,
    ) -> PreparedSharedSend<S, E> {
        if cancel.is_cancelled() {
            tracing::debug!(timestamp = message.timestamp, "cancelled before prepare");
            return PreparedSharedSend::fanout();
        }

        let thread_id = message.thread_id;
        let now = self.env.wall_clock_millis();
        let prepared = self.storage.write(|tx| {
            let thread = tx.thread(thread_id)?.ok_or_else(|| StorageError::NotFound {
                what: "thread",
                key: thread_id.to_string(),
            })?;

            self.store.expire_if_necessary(tx, &thread, now)?;

            let eligibility =
                filter_eligible(&*tx, &thread, recipients, credentials, self.local_account)?;
            if eligibility.eligible.len() < self.config.min_recipients {
                return Ok(None);
            }

            let plan = plan_distribution(
                tx,
                &self.store,
                &self.env,
                &eligibility.eligible,
                message,
                credentials,
            )?;
            Ok::<_, SendError>(Some((eligibility, plan)))
        });

        match prepared {
            Ok(Some((eligibility, distribution))) => PreparedSharedSend {
                ready_recipients: eligibility.eligible.clone(),
                execute: Some(SharedSendPlan {
                    sender: self.clone(),
                    message: message.clone(),
                    credentials: credentials.clone(),
                    eligible: eligibility.eligible,
                    excluded: eligibility.excluded,
                    distribution,
                    cancel: cancel.clone(),
                }),
            },
            Ok(None) => {
                tracing::debug!(thread = %thread_id, "too few eligible recipients");
                PreparedSharedSend::fanout()
            },
            Err(err) => {
                tracing::warn!(thread = %thread_id, error = %err, "failed to prepare shared send");
                PreparedSharedSend::fanout()
            },
        }
    }
}

impl<S: Storage, E: Environment> SharedSendPlan<S, E> {
    /// Recipients that will be sent a distribution message first.
    pub fn distribution_recipients(&self) -> Vec<ServiceId> {
        self.distribution.sends.iter().map(|send| send.recipient).collect()
    }

    /// Run the send to a terminal state.
    ///
    /// Returns every recipient that was not delivered through the shared
    /// path, including those excluded at prepare time, with the reason. The
    /// caller fans these out. Recipients the server reports as unregistered
    /// are a terminal success and are not returned.
    pub async fn execute(self) -> Vec<(ServiceId, SendError)> {
        let Self { sender, message, credentials, eligible, excluded, distribution, cancel } = self;

        let mut failures: Vec<_> =
            excluded.into_iter().map(|recipient| (recipient, SendError::NotEligible)).collect();

        if cancel.is_cancelled() {
            return cancelled(failures, &eligible);
        }

        let mut ready = eligible;
        if !distribution.sends.is_empty() {
            let results = send_distributions(&*sender.direct, distribution.sends).await;
            let outcome = record_distributions(
                &sender.storage,
                &sender.store,
                message.thread_id,
                message.timestamp,
                distribution.distribution_id,
                results,
                sender.env.wall_clock_millis(),
            );

            let failed: BTreeSet<ServiceId> = outcome.failed.iter().map(|(r, _)| *r).collect();
            ready.retain(|recipient| !failed.contains(recipient));
            failures.extend(outcome.failed);
        }

        if ready.is_empty() {
            return failures;
        }

        if cancel.is_cancelled() {
            return cancelled(failures, &ready);
        }

        let built = sender.storage.write(|tx| {
            build_shared_ciphertext(
                tx,
                &sender.store,
                &sender.env,
                &message,
                distribution.distribution_id,
                &ready,
                &credentials,
                sender.config.max_envelope_size,
            )
        });
        let shared = match built {
            Ok(shared) => shared,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build shared ciphertext");
                failures.extend(ready.into_iter().map(|recipient| (recipient, err.clone())));
                return failures;
            },
        };

        tracing::info!(
            thread = %message.thread_id,
            timestamp = message.timestamp,
            recipients = ready.len(),
            "sending shared ciphertext"
        );

        let orchestrator = Orchestrator {
            storage: &sender.storage,
            env: &sender.env,
            transport: &*sender.transport,
            challenges: &*sender.challenges,
            config: &sender.config,
        };
        match orchestrator.submit(&shared.request, &ready).await {
            Ok(accepted) => sender.reconcile(&message, &shared.addressed, &accepted),
            Err(err) => {
                tracing::warn!(
                    thread = %message.thread_id,
                    timestamp = message.timestamp,
                    error = %err,
                    "shared send failed"
                );
                failures.extend(ready.into_iter().map(|recipient| (recipient, err.clone())));
            },
        }

        failures
    }
}

impl<S: Storage, E: Environment> SharedSender<S, E> {
    /// Record a 200 in one write transaction.
    ///
    /// The server has delivered by now; a failure to record is logged and
    /// not turned into per-recipient failures, which would cause a second
    /// delivery through fanout.
    fn reconcile(
        &self,
        message: &OutgoingMessage,
        addressed: &[(ServiceId, Vec<DeviceId>)],
        accepted: &Accepted,
    ) {
        let thread_id = message.thread_id;
        let timestamp = message.timestamp;
        let delivered = accepted.delivered.len();
        let unregistered = accepted.unregistered.len();

        let recorded = self.storage.write(|tx| {
            for (recipient, devices) in addressed {
                if accepted.unregistered.contains(recipient) {
                    mark_unregistered(tx, *recipient, thread_id, timestamp)?;
                } else {
                    record_shared_delivery(
                        tx,
                        *recipient,
                        devices,
                        thread_id,
                        timestamp,
                        message.payload_id,
                        message.is_story,
                    )?;
                }
            }

            tx.on_commit(Box::new(move || {
                tracing::info!(
                    thread = %thread_id,
                    timestamp,
                    delivered,
                    unregistered,
                    "shared send delivered"
                );
            }));
            Ok::<_, StorageError>(())
        });

        if let Err(err) = recorded {
            tracing::error!(
                thread = %thread_id,
                timestamp,
                error = %err,
                "failed to record shared send"
            );
        }
    }
}

fn cancelled(
    mut failures: Vec<(ServiceId, SendError)>,
    recipients: &[ServiceId],
) -> Vec<(ServiceId, SendError)> {
    tracing::debug!(recipients = recipients.len(), "shared send cancelled");
    failures.extend(recipients.iter().map(|recipient| (*recipient, SendError::Cancelled)));
    failures
}
