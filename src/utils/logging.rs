// src/utils/logging.rs
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset: our own crate at the requested
/// level, dependencies (reqwest, hyper) at warn.
fn default_directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("warn,holdings_harvester={}", level)
}

/// Sets up the logging framework using tracing_subscriber.
/// Reads log level filters from the `RUST_LOG` environment variable.
pub fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::debug!("Logging setup complete.");
}
