//! Scripted collaborators.
//!
//! Each one answers from a queue the test fills in advance and records every
//! call it receives. An empty queue falls back to the happy path.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use sealcast_core::{DeviceId, ServiceId};
use sealcast_sender::{
    ChallengeResolver, DirectSendError, DirectSender, DistributionReceipt, DistributionSend,
    HttpResponse, MultiRecipientRequest, Transport, TransportError,
};
use serde_json::json;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 200 body listing `unregistered` accounts.
pub fn accepted(unregistered: &[ServiceId]) -> HttpResponse {
    let uuids: Vec<String> = unregistered.iter().map(ToString::to_string).collect();
    HttpResponse::new(200, json!({ "uuids404": uuids }).to_string())
}

/// 409 body for one account.
pub fn mismatched_devices(
    recipient: ServiceId,
    missing: &[u32],
    extra: &[u32],
) -> HttpResponse {
    let body = json!([{
        "uuid": recipient.to_string(),
        "devices": { "missingDevices": missing, "extraDevices": extra },
    }]);
    HttpResponse::new(409, body.to_string())
}

/// 410 body for one account.
pub fn stale_devices(recipient: ServiceId, stale: &[u32]) -> HttpResponse {
    let body = json!([{
        "uuid": recipient.to_string(),
        "devices": { "staleDevices": stale },
    }]);
    HttpResponse::new(410, body.to_string())
}

/// 428 with a challenge body.
pub fn challenge(retry_after: Duration) -> HttpResponse {
    HttpResponse {
        status: 428,
        body: json!({ "token": "sim", "options": ["pushChallenge"] }).to_string().into_bytes(),
        retry_after: Some(retry_after),
    }
}

/// Multi-recipient endpoint that answers from a script.
#[derive(Default)]
pub struct ScriptedServer {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<MultiRecipientRequest>>,
}

impl ScriptedServer {
    /// Server that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn respond(&self, response: HttpResponse) {
        lock(&self.script).push_back(Ok(response));
    }

    /// Queue a network failure.
    pub fn fail(&self, err: TransportError) {
        lock(&self.script).push_back(Err(err));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<MultiRecipientRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn submit(
        &self,
        request: &MultiRecipientRequest,
    ) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(request.clone());
        lock(&self.script).pop_front().unwrap_or_else(|| Ok(accepted(&[])))
    }
}

/// The 1:1 send path.
///
/// Succeeds for every recipient whose devices it knows, reporting them with
/// their registration ids, unless a failure was scripted for that recipient.
#[derive(Default)]
pub struct ScriptedDirectSender {
    devices: Mutex<BTreeMap<ServiceId, Vec<(DeviceId, u32)>>>,
    failures: Mutex<BTreeMap<ServiceId, DirectSendError>>,
    sent: Mutex<Vec<DistributionSend>>,
}

impl ScriptedDirectSender {
    /// Sender that knows no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices (with registration ids) a send to `recipient` reaches.
    pub fn set_devices(&self, recipient: ServiceId, devices: Vec<(DeviceId, u32)>) {
        lock(&self.devices).insert(recipient, devices);
    }

    /// Fail every send to `recipient` with `err`.
    pub fn fail(&self, recipient: ServiceId, err: DirectSendError) {
        lock(&self.failures).insert(recipient, err);
    }

    /// Stop failing sends to `recipient`.
    pub fn heal(&self, recipient: ServiceId) {
        lock(&self.failures).remove(&recipient);
    }

    /// Every distribution message sent so far, failed ones included.
    pub fn sent(&self) -> Vec<DistributionSend> {
        lock(&self.sent).clone()
    }

    /// Recipients of [`sent`](Self::sent).
    pub fn sent_to(&self) -> Vec<ServiceId> {
        lock(&self.sent).iter().map(|send| send.recipient).collect()
    }
}

#[async_trait]
impl DirectSender for ScriptedDirectSender {
    async fn send_distribution(
        &self,
        send: DistributionSend,
    ) -> Result<DistributionReceipt, DirectSendError> {
        let recipient = send.recipient;
        let timestamp = send.on_behalf_of_timestamp;
        lock(&self.sent).push(send);

        if let Some(err) = lock(&self.failures).get(&recipient) {
            return Err(err.clone());
        }

        let devices = lock(&self.devices).get(&recipient).cloned().unwrap_or_default();
        Ok(DistributionReceipt { timestamp, devices })
    }
}

/// Challenge resolver with a fixed answer.
pub struct ScriptedChallenges {
    passes: bool,
    seen: Mutex<Vec<Duration>>,
}

impl ScriptedChallenges {
    /// Resolver that passes every challenge if `passes`, else fails them.
    pub fn new(passes: bool) -> Self {
        Self { passes, seen: Mutex::default() }
    }

    /// `retry_after` of every challenge seen so far.
    pub fn seen(&self) -> Vec<Duration> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl ChallengeResolver for ScriptedChallenges {
    async fn resolve(&self, _body: &[u8], retry_after: Duration) -> bool {
        lock(&self.seen).push(retry_after);
        self.passes
    }
}
