//! Logging initialization and configuration.
//!
//! Log output always goes to stderr so that the client's stdout carries
//! nothing but remote shell output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter used by the server when `RUST_LOG` is unset.
pub const SERVER_DEFAULT_FILTER: &str = "netshell=info";

/// Default filter used by the client when `RUST_LOG` is unset.
pub const CLIENT_DEFAULT_FILTER: &str = "netshell=warn";

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize logging with an explicit filter directive (e.g. `debug` or
/// `netshell=trace`), ignoring `RUST_LOG`.
///
/// A bare level such as `debug` is scoped to this crate.
pub fn init_with_filter(directive: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let directive = if directive.contains('=') || directive.contains(',') {
        directive.to_string()
    } else {
        format!("netshell={}", directive)
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    try_init_with_default(SERVER_DEFAULT_FILTER)
}

/// Try to initialize logging, honoring `RUST_LOG` and falling back to
/// `default` when it is unset.
pub fn try_init_with_default(default: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter_or(default))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
}
