//! Submitting the shared ciphertext and interpreting the answer.
//!
//! ```text
//! Sending ──200──────────────► Success (delivered, unregistered)
//!    │ ──network──► backoff ──► Sending        (while retries remain)
//!    │ ──428──► challenge ok ──► Sending       (while retries remain)
//!    │ ──409/410──► correct bookkeeping ──► MustRebuild
//!    └ ──401/404/other──► Fatal
//! ```
//!
//! Network failures and resolved challenges draw on one retry budget.

use std::collections::BTreeSet;

use sealcast_core::{Environment, ServiceId, Storage};

use crate::{
    config::SenderConfig,
    error::{SendError, SenderKeyError},
    reconcile::{apply_device_corrections, archive_stale_sessions},
    response::{decode_mismatched, decode_stale, decode_success},
    transport::{ChallengeResolver, MultiRecipientRequest, Transport},
};

/// The only non-error terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Accepted {
    /// Addressed recipients the server delivered to
    pub delivered: Vec<ServiceId>,
    /// Addressed recipients the server does not know
    pub unregistered: Vec<ServiceId>,
}

/// Drives one request to a terminal state.
pub(crate) struct Orchestrator<'a, S, E> {
    pub storage: &'a S,
    pub env: &'a E,
    pub transport: &'a dyn Transport,
    pub challenges: &'a dyn ChallengeResolver,
    pub config: &'a SenderConfig,
}

impl<S: Storage, E: Environment> Orchestrator<'_, S, E> {
    /// Submit `request`, addressed to `recipients`.
    ///
    /// 409 and 410 corrections are committed before the error is returned.
    pub async fn submit(
        &self,
        request: &MultiRecipientRequest,
        recipients: &[ServiceId],
    ) -> Result<Accepted, SendError> {
        let mut retries_left = self.config.max_retries;
        let mut network_failures = 0;

        loop {
            let response = match self.transport.submit(request).await {
                Ok(response) => response,
                Err(err) => {
                    if retries_left == 0 {
                        tracing::warn!(error = %err, "multi-recipient request failed");
                        return Err(SendError::Transport(err.to_string()));
                    }
                    retries_left -= 1;

                    let delay = self.config.backoff(network_failures);
                    network_failures += 1;
                    tracing::debug!(
                        error = %err,
                        ?delay,
                        retries_left,
                        "retrying after network failure"
                    );
                    self.env.sleep(delay).await;
                    continue;
                },
            };

            match response.status {
                200 => return accepted(&response.body, recipients),
                401 => {
                    tracing::error!("composite access key rejected");
                    return Err(SenderKeyError::InvalidAuthHeader.into());
                },
                404 => {
                    tracing::warn!(
                        recipients = recipients.len(),
                        "an addressed account is unknown"
                    );
                    return Err(SenderKeyError::InvalidRecipient.into());
                },
                409 => {
                    let accounts = decode_mismatched(&response.body)?;
                    self.storage.write(|tx| apply_device_corrections(tx, &accounts))?;
                    return Err(SenderKeyError::DeviceUpdate.into());
                },
                410 => {
                    let accounts = decode_stale(&response.body)?;
                    self.storage.write(|tx| archive_stale_sessions(tx, &accounts))?;
                    return Err(SenderKeyError::StaleDevices.into());
                },
                428 => {
                    let Some(retry_after) = response.retry_after else {
                        return Err(SendError::InvalidResponse(
                            "challenge without retry-after".into(),
                        ));
                    };
                    if response.body.is_empty() {
                        return Err(SendError::InvalidResponse("no data provided".into()));
                    }

                    tracing::info!(?retry_after, "spam challenge");
                    if !self.challenges.resolve(&response.body, retry_after).await {
                        return Err(SendError::ChallengeRequired);
                    }
                    if retries_left == 0 {
                        return Err(SendError::Http { status: 428 });
                    }
                    retries_left -= 1;
                },
                status => {
                    tracing::warn!(status, "unexpected status");
                    return Err(SendError::Http { status });
                },
            }
        }
    }
}

fn accepted(body: &[u8], recipients: &[ServiceId]) -> Result<Accepted, SendError> {
    let unknown: BTreeSet<ServiceId> = decode_success(body)?.unregistered.into_iter().collect();
    let (unregistered, delivered) =
        recipients.iter().copied().partition(|r| unknown.contains(r));
    Ok(Accepted { delivered, unregistered })
}
