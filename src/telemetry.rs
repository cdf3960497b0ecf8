//! Logging setup for binaries and demos.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the host. [`init_tracing`] installs a plain `fmt` subscriber.

use tracing::Level;

/// Installs a `fmt` subscriber at `INFO`.
///
/// Returns false if a global subscriber is already set.
pub fn init_tracing() -> bool {
  init_tracing_with(Level::INFO)
}

/// Installs a `fmt` subscriber at the given level.
pub fn init_tracing_with(level: Level) -> bool {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(true)
    .try_init()
    .is_ok()
}
