//! Tracing setup for hosts that do not install their own subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `config.level`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("wipry-core v{} logging initialised", crate::version());
    }
    installed
}
