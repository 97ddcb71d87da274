//! Worker host for the check-result reconciler.
//!
//! Modules are re-exported for integration testing; the binary entrypoint
//! lives in `main.rs`.

pub mod config;
pub mod consumer;
#[cfg(feature = "legacy-bastions")]
pub mod directory;
pub mod hooks;
pub mod notifier;
pub mod reconciler;
pub mod transport;
