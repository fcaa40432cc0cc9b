//! Sealcast Cryptographic Primitives
//!
//! Cryptographic building blocks for shared-ciphertext ("sender key")
//! delivery. Pure functions with deterministic outputs. Callers provide
//! random bytes for deterministic testing.
//!
//! # Key Lifecycle
//!
//! A sending epoch is identified by a [`DistributionId`] and owns one chain
//! key. The chain key is handed to every recipient once, inside a
//! [`SenderKeyDistributionMessage`]. After that, each group message advances
//! the chain and is encrypted once for all recipient devices.
//!
//! ```text
//! Epoch seed (random, per thread)
//!        │
//!        ▼
//! HKDF → Chain Key (bound to distribution id)
//!        │
//!        ├──► Distribution Message (1:1, per recipient)
//!        ▼
//! Sender Chain → Message Keys
//!        │
//!        ▼
//! AEAD Encryption → Multi-Recipient Envelope
//! ```
//!
//! # Access Credentials
//!
//! Sealed delivery to many recipients is authorized by a composite access
//! key: the XOR of one 16-byte key per recipient. See [`access`].
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain advancement: old chain keys are zeroized after deriving the next
//! - Message key disposal: keys are zeroized immediately after single use
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD with the group id as associated data
//! - Nonce binds message to (distribution id, iteration)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod access;
pub mod envelope;
mod error;
pub mod padding;
pub mod sender_keys;

pub use access::{AccessKey, composite_access_key};
pub use envelope::{EnvelopeRecipient, MAX_REGISTRATION_ID, MultiRecipientEnvelope};
pub use error::CryptoError;
pub use padding::{pad_message_body, unpad_message_body};
pub use sender_keys::{
    ChainState, DistributionId, MessageKey, NONCE_RANDOM_SIZE, SenderChain,
    SenderKeyDistributionMessage, SenderKeyMessage, decrypt_group_message, derive_chain_seed,
    encrypt_group_message,
};
