//! Structured logging with tracing
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! The filter comes from `OPSVAULT_LOG` when set, otherwise from the
//! verbosity flag.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding an `EnvFilter` directive
pub const LOG_ENV: &str = "OPSVAULT_LOG";

/// Initialize the global subscriber
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = Registry::default().with(filter);
    let result = if json {
        let layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
        registry.with(layer).try_init()
    };

    if result.is_ok() {
        tracing::debug!(verbose, json, "logging initialized");
    }
}
