//! Tracing subscriber setup for binaries and demos built on the SDK.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LOG_LEVEL_ENV;

/// Installs a console subscriber filtered by `LOGLEVEL`.
///
/// `default_level` is used when `LOGLEVEL` is unset or unparsable. Returns
/// `false` when a global subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    let env_filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
