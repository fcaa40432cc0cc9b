//! Sender Keys: one chain per sending epoch, shared with every recipient
//!
//! ```text
//! Epoch Seed + DistributionId
//!        │
//!        ▼ HKDF-Expand
//! Chain Key
//!        │
//!        ▼ Advance
//! MessageKey[iteration]
//!        │
//!        ▼ Encrypt
//! XChaCha20-Poly1305 Ciphertext
//! ```

mod derivation;
mod distribution;
mod encryption;
mod ratchet;

pub use derivation::derive_chain_seed;
pub use distribution::{DistributionId, SenderKeyDistributionMessage};
pub use encryption::{
    NONCE_RANDOM_SIZE, SenderKeyMessage, decrypt_group_message, encrypt_group_message,
};
pub use ratchet::{ChainState, MessageKey, SenderChain};
