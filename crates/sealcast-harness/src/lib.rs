//! Deterministic simulation harness for sealcast shared sends.
//!
//! Implementations of the sender's collaborators that answer from scripts,
//! a seeded environment with a virtual clock, and a [`World`] that builds
//! threads, recipients and sessions in storage.
//!
//! ```text
//! World ──► SharedSender<S, SimEnv>
//!              ├──► ScriptedServer        (multi-recipient endpoint)
//!              ├──► ScriptedDirectSender  (1:1 distribution path)
//!              └──► ScriptedChallenges    (428 resolver)
//! ```
//!
//! Set `RUST_LOG` and call [`init_tracing`] to see the sender's logs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scripted;
pub mod sim_env;
pub mod world;

pub use scripted::{ScriptedChallenges, ScriptedDirectSender, ScriptedServer};
pub use sim_env::SimEnv;
pub use world::World;

/// Install a `RUST_LOG`-filtered subscriber. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}
