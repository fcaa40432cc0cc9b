//! Multi-recipient envelope.
//!
//! One group-encrypted body plus a header naming every addressed device.
//! The server fans the body out to the listed devices; recipients use the
//! sender chain they received out of band to decrypt it.

use serde::{Deserialize, Serialize};

use crate::{error::CryptoError, sender_keys::SenderKeyMessage};

/// Largest registration id representable in the recipient header (14 bits).
pub const MAX_REGISTRATION_ID: u32 = 0x3fff;

/// One addressed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvelopeRecipient {
    /// Account identifier bytes
    pub service_id: [u8; 16],
    /// Device on that account
    pub device_id: u32,
    /// Remote registration id from the device's session
    pub registration_id: u32,
}

/// Shared ciphertext addressed to many devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRecipientEnvelope {
    /// Devices the body is addressed to
    pub recipients: Vec<EnvelopeRecipient>,
    /// Routing group id; empty for non-group threads
    pub group_id: Vec<u8>,
    /// Content hint for the receiving client's error handling
    pub content_hint: u8,
    /// The group-encrypted body
    pub message: SenderKeyMessage,
}

impl MultiRecipientEnvelope {
    /// Validate and serialize to CBOR.
    ///
    /// # Errors
    ///
    /// - `NoRecipients` if no device is addressed
    /// - `InvalidRegistrationId` if any registration id exceeds 14 bits
    pub fn encode(&self) -> Result<Vec<u8>, CryptoError> {
        if self.recipients.is_empty() {
            return Err(CryptoError::NoRecipients);
        }

        if let Some(bad) = self.recipients.iter().find(|r| r.registration_id > MAX_REGISTRATION_ID)
        {
            return Err(CryptoError::InvalidRegistrationId {
                device_id: bad.device_id,
                registration_id: bad.registration_id,
            });
        }

        let mut bytes = Vec::with_capacity(64 + self.message.ciphertext.len());
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, CryptoError> {
        ciborium::from_reader(bytes).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}
