//! Common test utilities and helpers
//!
//! Shared fixtures: test key pairs, metadata documents and signed protocol
//! messages, plus mock collaborators.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

/// Install a test subscriber once so `RUST_LOG` works during test runs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
