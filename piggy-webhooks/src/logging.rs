//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber. The default level is `info`, raised
/// to `debug` when the `DEBUG` option is set; `RUST_LOG` overrides both.
pub fn init(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
