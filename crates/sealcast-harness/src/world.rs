//! Simulated world: one local account, one thread, scripted collaborators.
//!
//! The world writes threads, recipients and sessions straight into storage
//! and keeps the scripted 1:1 sender in sync, so the sender under test sees
//! a consistent picture.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use sealcast_core::{
    AccessMode, DeviceId, Environment, GroupId, MemoryStorage, OutgoingMessage, ProtocolAddress,
    RecipientRecord, SealedSenderAccess, ServiceId, SessionRecord, Storage, StorageError, ThreadId,
    ThreadRecord,
};
use sealcast_crypto::AccessKey;
use sealcast_sender::{PreparedSharedSend, SendError, SenderConfig, SharedSender};
use tokio_util::sync::CancellationToken;

use crate::{
    scripted::{ScriptedChallenges, ScriptedDirectSender, ScriptedServer},
    sim_env::SimEnv,
};

/// A thread with members, their devices and sessions.
pub struct World<S: Storage = MemoryStorage> {
    /// Shared storage
    pub storage: S,
    /// Simulated environment
    pub env: SimEnv,
    /// Multi-recipient endpoint
    pub server: Arc<ScriptedServer>,
    /// 1:1 send path
    pub direct: Arc<ScriptedDirectSender>,
    /// Challenge resolver
    pub challenges: Arc<ScriptedChallenges>,
    /// Sender configuration
    pub config: SenderConfig,
    /// Local account
    pub local: ServiceId,
    /// The thread every message goes to
    pub thread: ThreadId,
    credentials: BTreeMap<ServiceId, SealedSenderAccess>,
    devices: BTreeMap<ServiceId, Vec<(DeviceId, u32)>>,
    members: BTreeSet<ServiceId>,
    next_account: u128,
    next_timestamp: u64,
}

impl World<MemoryStorage> {
    /// Empty world over memory storage.
    pub fn new(seed: u64) -> Self {
        Self::with_storage(MemoryStorage::new(), seed)
    }
}

impl<S: Storage> World<S> {
    /// Empty world over `storage`.
    ///
    /// # Panics
    ///
    /// Panics if the initial thread cannot be written.
    pub fn with_storage(storage: S, seed: u64) -> Self {
        let mut world = Self {
            storage,
            env: SimEnv::with_seed(seed),
            server: Arc::new(ScriptedServer::new()),
            direct: Arc::new(ScriptedDirectSender::new()),
            challenges: Arc::new(ScriptedChallenges::new(true)),
            config: SenderConfig::default(),
            local: ServiceId::from_u128(u128::MAX),
            thread: ThreadId(u128::from(seed) + 1),
            credentials: BTreeMap::new(),
            devices: BTreeMap::new(),
            members: BTreeSet::new(),
            next_account: 1,
            next_timestamp: 1,
        };
        world.members.insert(world.local);
        world.save_thread();
        world
    }

    /// Replace the challenge resolver.
    pub fn with_challenges(mut self, challenges: ScriptedChallenges) -> Self {
        self.challenges = Arc::new(challenges);
        self
    }

    /// Add a member with current sessions on `devices`.
    pub fn member(&mut self, devices: &[u32]) -> ServiceId {
        let recipient = self.next_service_id();
        let devices: Vec<(DeviceId, u32)> =
            devices.iter().map(|&d| (DeviceId(d), self.registration_id(recipient, d))).collect();

        self.write(|tx| {
            tx.put_recipient(&RecipientRecord::new(recipient, devices.iter().map(|(d, _)| *d)))?;
            for &(device_id, registration_id) in &devices {
                tx.put_session(
                    ProtocolAddress::new(recipient, device_id),
                    &SessionRecord::current(registration_id),
                )?;
            }
            Ok(())
        });
        self.join(recipient, devices);
        recipient
    }

    /// Add a member the local account has never talked to: devices are
    /// known only to the 1:1 path, which will create sessions on first use.
    pub fn stranger(&mut self, devices: &[u32]) -> ServiceId {
        let recipient = self.next_service_id();
        let devices =
            devices.iter().map(|&d| (DeviceId(d), self.registration_id(recipient, d))).collect();
        self.join(recipient, devices);
        recipient
    }

    /// Change `recipient`'s credential.
    pub fn set_access(&mut self, recipient: ServiceId, mode: AccessMode) {
        if let Some(access) = self.credentials.get_mut(&recipient) {
            access.mode = mode;
        }
    }

    /// Give a device of `recipient` a new registration id, as if it
    /// re-registered and the local session was rebuilt.
    pub fn reregister(&mut self, recipient: ServiceId, device: u32, registration_id: u32) {
        let address = ProtocolAddress::new(recipient, DeviceId(device));
        self.write(|tx| tx.put_session(address, &SessionRecord::current(registration_id)));

        let devices = self.devices.entry(recipient).or_default();
        for entry in devices.iter_mut().filter(|(d, _)| d.0 == device) {
            entry.1 = registration_id;
        }
        self.direct.set_devices(recipient, devices.clone());
    }

    /// Remove `recipient` from the thread.
    pub fn leave(&mut self, recipient: ServiceId) {
        self.members.remove(&recipient);
        self.save_thread();
    }

    /// Credentials of every member.
    pub fn credentials(&self) -> &BTreeMap<ServiceId, SealedSenderAccess> {
        &self.credentials
    }

    /// Every member except the local account.
    pub fn recipients(&self) -> Vec<ServiceId> {
        self.members.iter().copied().filter(|m| *m != self.local).collect()
    }

    /// Next message, with a resend payload id.
    pub fn message(&mut self, body: &[u8]) -> OutgoingMessage {
        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;

        let mut message = OutgoingMessage::new(self.thread, timestamp, body.to_vec());
        message.payload_id = Some(timestamp);
        message
    }

    /// A sender wired to this world.
    pub fn sender(&self) -> SharedSender<S, SimEnv> {
        SharedSender::new(
            self.storage.clone(),
            self.env.clone(),
            self.server.clone(),
            self.direct.clone(),
            self.challenges.clone(),
            self.local,
            self.config.clone(),
        )
    }

    /// Prepare `message` for `recipients`.
    pub fn prepare(
        &self,
        recipients: &[ServiceId],
        message: &OutgoingMessage,
    ) -> PreparedSharedSend<S, SimEnv> {
        self.sender().prepare_shared_send(
            recipients,
            message,
            &self.credentials,
            &CancellationToken::new(),
        )
    }

    /// Prepare and execute `message` for every member.
    ///
    /// Returns the ready set and, if the shared path ran, its failures.
    pub async fn send(
        &self,
        message: &OutgoingMessage,
    ) -> (Vec<ServiceId>, Option<Vec<(ServiceId, SendError)>>) {
        let prepared = self.prepare(&self.recipients(), message);
        let failures = match prepared.execute {
            Some(plan) => Some(plan.execute().await),
            None => None,
        };
        (prepared.ready_recipients, failures)
    }

    fn join(&mut self, recipient: ServiceId, devices: Vec<(DeviceId, u32)>) {
        self.direct.set_devices(recipient, devices.clone());
        self.devices.insert(recipient, devices);

        let key = AccessKey::from_bytes(self.env.random_array());
        self.credentials.insert(recipient, SealedSenderAccess { mode: AccessMode::Enabled, key });
        self.members.insert(recipient);
        self.save_thread();
    }

    fn save_thread(&mut self) {
        let record = ThreadRecord {
            thread_id: self.thread,
            group_id: GroupId(self.thread.0.to_be_bytes().to_vec()),
            members: self.members.clone(),
        };
        self.write(|tx| tx.put_thread(&record));
    }

    fn next_service_id(&mut self) -> ServiceId {
        let id = ServiceId::from_u128(self.next_account);
        self.next_account += 1;
        id
    }

    fn registration_id(&self, recipient: ServiceId, device: u32) -> u32 {
        let bytes = recipient.as_bytes();
        (u32::from(bytes[15]) * 100 + device) & 0x3fff
    }

    #[allow(clippy::panic, reason = "world setup failure is a broken test")]
    fn write(&self, f: impl FnOnce(&mut dyn sealcast_core::WriteTxn) -> Result<(), StorageError>) {
        if let Err(err) = self.storage.write(f) {
            panic!("world setup write failed: {err}");
        }
    }
}
