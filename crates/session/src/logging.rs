//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Build the log filter for a configuration.
///
/// `RUST_LOG` wins when it is set and parses; otherwise the configured
/// level applies.
pub fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()))
}

/// Install the global fmt subscriber.
///
/// Returns false when a subscriber was already installed.
pub fn init_tracing(config: &Config) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .try_init()
        .is_ok()
}
