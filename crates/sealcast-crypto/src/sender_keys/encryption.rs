//! Group message encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - random bytes must be provided by the caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};

use super::{
    distribution::DistributionId,
    ratchet::{MessageKey, SenderChain},
};
use crate::error::CryptoError;

/// Size of the random suffix in the nonce (8 bytes)
pub const NONCE_RANDOM_SIZE: usize = 8;

/// A message encrypted under one epoch's sender chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyMessage {
    /// Epoch the chain belongs to
    pub distribution_id: DistributionId,
    /// Chain iteration used for the message key
    pub iteration: u32,
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Encrypt a group message, advancing the sender chain.
///
/// The group id is bound as associated data: a ciphertext replayed into a
/// different group fails authentication.
pub fn encrypt_group_message(
    chain: &mut SenderChain,
    distribution_id: DistributionId,
    group_id: &[u8],
    padded_plaintext: &[u8],
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> Result<SenderKeyMessage, CryptoError> {
    let message_key = chain.advance()?;
    let nonce = build_nonce(&distribution_id, message_key.iteration(), random_suffix);
    let cipher = XChaCha20Poly1305::new(message_key.key().into());

    let Ok(ciphertext) = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: padded_plaintext, aad: group_id })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Ok(SenderKeyMessage { distribution_id, iteration: message_key.iteration(), nonce, ciphertext })
}

/// Decrypt a group message with a chain received via distribution message.
///
/// # Errors
///
/// - `DistributionMismatch` if the message belongs to another epoch
/// - `ChainTooFarBehind` if the iteration was already consumed
/// - `DecryptionFailed` on tampering, wrong key, or wrong group id
pub fn decrypt_group_message(
    chain: &mut SenderChain,
    distribution_id: DistributionId,
    group_id: &[u8],
    message: &SenderKeyMessage,
) -> Result<Vec<u8>, CryptoError> {
    if message.distribution_id != distribution_id {
        return Err(CryptoError::DistributionMismatch);
    }

    let message_key = chain.advance_to(message.iteration)?;
    decrypt_with_key(&message_key, group_id, message)
}

fn decrypt_with_key(
    message_key: &MessageKey,
    group_id: &[u8],
    message: &SenderKeyMessage,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(message_key.key().into());
    cipher
        .decrypt(
            XNonce::from_slice(&message.nonce),
            Payload { msg: message.ciphertext.as_slice(), aad: group_id },
        )
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

/// Build a 24-byte nonce for `XChaCha20`.
///
/// Structure:
/// - bytes 0-11: distribution id prefix
/// - bytes 12-15: iteration (big-endian)
/// - bytes 16-23: random suffix (caller-provided)
fn build_nonce(
    distribution_id: &DistributionId,
    iteration: u32,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..12].copy_from_slice(&distribution_id.as_bytes()[0..12]);
    nonce[12..16].copy_from_slice(&iteration.to_be_bytes());
    nonce[16..24].copy_from_slice(&random_suffix);
    nonce
}
