//! Tracing subscriber setup for the binary.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
///
/// `log` records emitted by the library are bridged into tracing first, so
/// both macro families end up on the same output.
pub fn init(config: &LoggingConfig) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge already installed: {}", e);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format.as_str() {
        "json" => tracing::subscriber::set_global_default(
            fmt().json().with_env_filter(filter).finish(),
        ),
        _ => tracing::subscriber::set_global_default(fmt().with_env_filter(filter).finish()),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
