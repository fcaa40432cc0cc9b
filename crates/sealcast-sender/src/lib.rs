//! Sealcast sender.
//!
//! Delivers one message to many recipients with a single shared ciphertext
//! ("sender key") when it can, and tells the caller exactly which recipients
//! it could not serve so they can be sent to one at a time ("fanout").
//!
//! # Architecture
//!
//! ```text
//! prepare_shared_send ──► eligibility ──► epoch + distribution plan
//!                                             │
//! execute ──► 1:1 distribution (concurrent) ──┘
//!         ──► shared ciphertext + composite access key (one snapshot)
//!         ──► submit (retry, 409/410 corrections, 428 challenge)
//!         ──► reconcile
//! ```
//!
//! # Components
//!
//! - [`SharedSender`]: the entry point
//! - [`eligibility`]: who may take the shared path
//! - [`sender_key_store`]: per-thread epochs, rotation, delivery records
//! - [`oracle`]: device lists and session validity
//! - [`reconcile`]: writing server answers back into storage
//! - [`transport`]: the collaborators the engine drives (server, 1:1 path,
//!   challenge resolver)
//!
//! # Failures
//!
//! Nothing here fails the whole send. Every recipient that was not delivered
//! comes back from [`SharedSendPlan::execute`] with a [`SendError`] whose
//! [`is_fanout_only`](SendError::is_fanout_only) and
//! [`is_retryable`](SendError::is_retryable) tell the caller what to do next.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod builder;
pub mod config;
mod distribution;
pub mod eligibility;
pub mod error;
pub mod oracle;
mod orchestrator;
pub mod reconcile;
pub mod response;
mod sender;
pub mod sender_key_store;
pub mod transport;

pub use config::SenderConfig;
pub use eligibility::{Eligibility, filter_eligible};
pub use error::{SendError, SenderKeyError};
pub use oracle::SessionValidity;
pub use sender::{PreparedSharedSend, SharedSendPlan, SharedSender};
pub use sender_key_store::SenderKeyStore;
pub use transport::{
    ChallengeResolver, DirectSendError, DirectSender, DistributionReceipt, DistributionSend,
    HttpResponse, MultiRecipientRequest, Transport, TransportError,
};
