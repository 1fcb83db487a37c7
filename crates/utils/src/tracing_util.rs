//! Helpers related to tracing, used by main entrypoints

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Initialize tracing with the default configuration; lines go to
/// stderr so command output on stdout stays machine-parseable.
/// The filter honors `CTRBUILD_LOG` and falls back to the level
/// passed by the caller (normally from `--log-level`).
pub fn initialize_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("CTRBUILD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
    tracing::trace!("starting tracing");
}
