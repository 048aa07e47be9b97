//! Logging initialization.
//!
//! The library itself only emits `tracing` events; installing a
//! subscriber is the embedding application's job. This helper covers
//! the common case: a fmt subscriber filtered by `RUST_LOG`,
//! defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once: if a subscriber is already installed
/// (for example by a test harness), the call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
