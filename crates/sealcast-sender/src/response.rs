//! Multi-recipient endpoint response bodies (JSON).

use sealcast_core::{DeviceId, ServiceId};
use serde::Deserialize;

use crate::error::SendError;

/// 200 body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuccessPayload {
    /// Addressed accounts the server does not know
    #[serde(rename = "uuids404")]
    pub unregistered: Vec<ServiceId>,
}

/// One account in a 409 body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MismatchedDevices {
    /// Account
    #[serde(rename = "uuid")]
    pub service_id: ServiceId,
    /// Corrections
    pub devices: DeviceMismatch,
}

/// Device corrections for one account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMismatch {
    /// Devices the server has and we did not address
    pub missing_devices: Vec<DeviceId>,
    /// Devices we addressed that no longer exist
    pub extra_devices: Vec<DeviceId>,
}

/// One account in a 410 body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaleDevices {
    /// Account
    #[serde(rename = "uuid")]
    pub service_id: ServiceId,
    /// Stale devices
    pub devices: StaleDeviceSet,
}

/// Devices whose sessions are stale.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleDeviceSet {
    /// Devices that re-registered since our session was built
    pub stale_devices: Vec<DeviceId>,
}

/// Decode a 200 body.
pub fn decode_success(body: &[u8]) -> Result<SuccessPayload, SendError> {
    decode(body)
}

/// Decode a 409 body.
pub fn decode_mismatched(body: &[u8]) -> Result<Vec<MismatchedDevices>, SendError> {
    decode(body)
}

/// Decode a 410 body.
pub fn decode_stale(body: &[u8]) -> Result<Vec<StaleDevices>, SendError> {
    decode(body)
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, SendError> {
    if body.is_empty() {
        return Err(SendError::InvalidResponse("no data provided".into()));
    }
    serde_json::from_slice(body).map_err(|e| SendError::InvalidResponse(e.to_string()))
}
