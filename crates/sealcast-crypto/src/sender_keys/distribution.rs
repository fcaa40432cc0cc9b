//! Distribution ids and sender key distribution messages

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ratchet::ChainState;
use crate::error::CryptoError;

/// Identifies one sending epoch.
///
/// Stable while the epoch is unexpired; a new epoch always gets a fresh id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistributionId([u8; 16]);

impl DistributionId {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DistributionId({self})")
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 1:1 payload carrying everything a recipient needs to decrypt future
/// shared ciphertexts of one epoch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyDistributionMessage {
    /// Epoch the chain belongs to
    pub distribution_id: DistributionId,
    /// Chain position at the time of distribution
    pub chain: ChainState,
}

impl fmt::Debug for SenderKeyDistributionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyDistributionMessage")
            .field("distribution_id", &self.distribution_id)
            .field("iteration", &self.chain.iteration)
            .finish()
    }
}

impl SenderKeyDistributionMessage {
    /// Serialize to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = Vec::with_capacity(64);
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        ciborium::from_reader(bytes).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}
