//! Sender chain for forward-secure message key derivation
//!
//! # Security Properties
//!
//! - Forward Secrecy: Old chain keys are overwritten when advancing
//! - Key Uniqueness: Each iteration produces a unique message key
//! - Determinism: Same seed always produces same key sequence

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// Maximum number of iterations to skip when catching up.
const MAX_SKIP: u32 = 2000;

/// A message key derived from the chain.
///
/// Used for a single encryption or decryption, then discarded.
#[derive(Clone)]
pub struct MessageKey {
    key: [u8; 32],
    iteration: u32,
}

impl MessageKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Chain iteration this key was derived from.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Persistable chain position.
///
/// Stored alongside the epoch so the chain survives restarts. Holding a
/// `ChainState` is equivalent to holding the chain itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Current chain key
    pub chain_key: [u8; 32],
    /// Number of message keys already derived
    pub iteration: u32,
}

impl std::fmt::Debug for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainState").field("iteration", &self.iteration).finish_non_exhaustive()
    }
}

impl Drop for ChainState {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

/// Forward-secure sender chain.
///
/// Each [`advance()`](Self::advance) call derives a message key from the
/// current chain key, then replaces the chain key with its successor.
pub struct SenderChain {
    chain_key: [u8; 32],
    iteration: u32,
}

impl SenderChain {
    /// Create a chain from a seed. The seed becomes the iteration-0 chain key.
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { chain_key: *seed, iteration: 0 }
    }

    /// Resume a chain from persisted state.
    pub fn from_state(state: &ChainState) -> Self {
        Self { chain_key: state.chain_key, iteration: state.iteration }
    }

    /// Snapshot the chain for persistence.
    pub fn state(&self) -> ChainState {
        ChainState { chain_key: self.chain_key, iteration: self.iteration }
    }

    /// Current iteration number.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Derive the message key for the current iteration and step forward.
    pub fn advance(&mut self) -> Result<MessageKey, CryptoError> {
        if self.iteration == u32::MAX {
            return Err(CryptoError::IterationOverflow { current: self.iteration });
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain_key = self.derive(CHAIN_LABEL);

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;

        let current = self.iteration;
        self.iteration += 1;

        Ok(MessageKey { key: message_key, iteration: current })
    }

    /// Advance the chain to a specific iteration (receiving side).
    pub fn advance_to(&mut self, target: u32) -> Result<MessageKey, CryptoError> {
        if target < self.iteration || target - self.iteration > MAX_SKIP {
            return Err(CryptoError::ChainTooFarBehind {
                current: self.iteration,
                requested: target,
            });
        }

        loop {
            let key = self.advance()?;
            if key.iteration() == target {
                return Ok(key);
            }
        }
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result);
        key
    }
}

impl Drop for SenderChain {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}
