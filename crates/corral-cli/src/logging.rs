//! Diagnostic log setup.
//!
//! Logs go to stderr so the container's stdout stays clean. `RUST_LOG`
//! overrides the level chosen on the command line.

use corral_common::config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
#[must_use]
pub fn default_filter(config: LogConfig) -> String {
    config.level.to_string()
}

/// Installs the global subscriber.
pub fn init(config: LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match config.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
