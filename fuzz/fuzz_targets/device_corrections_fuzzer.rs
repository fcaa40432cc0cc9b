//! Fuzz target for 409/410 bookkeeping
//!
//! # Strategy
//!
//! Arbitrary sequences of device corrections and stale reports, applied
//! through their JSON bodies to memory storage and mirrored in a model.
//!
//! # Invariants
//!
//! - Stored device lists equal the model after every step
//! - Removed devices have no session

#![no_main]

use std::collections::{BTreeMap, BTreeSet};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealcast_core::{
    DeviceId, MemoryStorage, ProtocolAddress, RecipientRecord, ServiceId, SessionRecord, Storage,
    StorageError,
};
use sealcast_sender::{
    reconcile::{apply_device_corrections, archive_stale_sessions},
    response::{decode_mismatched, decode_stale},
};
use serde_json::json;

#[derive(Debug, Arbitrary)]
enum Step {
    Mismatch { account: u8, missing: Vec<u8>, extra: Vec<u8> },
    Stale { account: u8, devices: Vec<u8> },
}

fn account(n: u8) -> ServiceId {
    ServiceId::from_u128(u128::from(n % 4) + 1)
}

fn device(n: u8) -> u32 {
    u32::from(n % 8) + 1
}

fuzz_target!(|steps: Vec<Step>| {
    let storage = MemoryStorage::new();
    let mut model: BTreeMap<ServiceId, BTreeSet<u32>> = BTreeMap::new();

    storage
        .write(|tx| {
            for n in 0..4u8 {
                let id = account(n);
                tx.put_recipient(&RecipientRecord::new(id, [DeviceId(1)]))?;
                tx.put_session(ProtocolAddress::new(id, DeviceId(1)), &SessionRecord::current(1))?;
                model.insert(id, [1].into_iter().collect());
            }
            Ok::<_, StorageError>(())
        })
        .unwrap();

    for step in steps.iter().take(64) {
        match step {
            Step::Mismatch { account: a, missing, extra } => {
                let missing: Vec<u32> = missing.iter().map(|d| device(*d)).collect();
                let extra: Vec<u32> = extra.iter().map(|d| device(*d)).collect();
                let body = json!([{
                    "uuid": account(*a).to_string(),
                    "devices": { "missingDevices": missing, "extraDevices": extra },
                }]);
                let accounts = decode_mismatched(body.to_string().as_bytes()).unwrap();
                storage.write(|tx| apply_device_corrections(tx, &accounts)).unwrap();

                let devices = model.entry(account(*a)).or_default();
                devices.extend(missing);
                for d in &extra {
                    devices.remove(d);
                }
            },
            Step::Stale { account: a, devices } => {
                let stale: Vec<u32> = devices.iter().map(|d| device(*d)).collect();
                let body = json!([{
                    "uuid": account(*a).to_string(),
                    "devices": { "staleDevices": stale },
                }]);
                let accounts = decode_stale(body.to_string().as_bytes()).unwrap();
                storage.write(|tx| archive_stale_sessions(tx, &accounts)).unwrap();
            },
        }

        for (id, expected) in &model {
            let (record, sessions) = storage
                .read(|tx| {
                    let record = tx.recipient(*id)?;
                    let mut sessions = BTreeMap::new();
                    for d in 1..=8 {
                        if let Some(s) = tx.session(ProtocolAddress::new(*id, DeviceId(d)))? {
                            sessions.insert(d, s);
                        }
                    }
                    Ok::<_, StorageError>((record, sessions))
                })
                .unwrap();

            let stored: BTreeSet<u32> =
                record.map(|r| r.devices.iter().map(|d| d.0).collect()).unwrap_or_default();
            assert_eq!(&stored, expected, "device list diverged for {id}");
            for d in sessions.keys() {
                assert!(stored.contains(d), "session survives removal of device {d}");
            }
        }
    }
});
