//! # Tessera Testkit
//!
//! Testing utilities for the Tessera journal.
//!
//! This crate provides:
//! - Temporary store fixtures for every backend kind
//! - A crash-injecting backend wrapper
//! - Property-based test generators
//! - Concurrent read/write stress drivers
//!
//! The testkit sits on top of `tessera_storage` only, so `tessera_core`
//! can use it from its own test suite.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::stress::*;
}

pub use crash::{CrashableBackend, CrashPoint};
pub use fixtures::{all_modes, open_store, store_options, TempStore};
pub use stress::{close_under_readers, round_trip, StressConfig, StressReport};

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber.
///
/// Output is filtered through `RUST_LOG` and captured by the test harness.
/// Calling this more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
