//! Diagnostics on stderr. Stdout carries command output only.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const ENV_VAR: &str = "GREENTIC_FORMS_LOG";

/// Reads `GREENTIC_FORMS_LOG`; falls back to `debug` with `--verbose`,
/// `warn` otherwise.
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
