//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber. `PIGGY_DEBUG` raises the level to
/// debug; `RUST_LOG` overrides both.
pub fn init(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
