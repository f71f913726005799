//! Subscriber installation for applications embedding the engine.
//!
//! Library crates log through the `log` facade; the subscriber installed here
//! receives those records through the `tracing-log` bridge.

use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides [`LoggingConfig::level`].
pub const LOG_ENV: &str = "REMORA_LOG";

/// Build the filter: `REMORA_LOG` when set and valid, otherwise the
/// configured level, otherwise `info`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns `false` if one was already
/// installed (for instance by the host application or a previous call).
pub fn init_logging(config: &LoggingConfig) -> bool {
    let (plain, json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_target(true)), None)
    };
    let installed = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(plain)
        .with(json)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(json = config.json, filter = %config.level, "logging initialised");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        assert!(!init_logging(&config) || !first);
        log::info!("bridged through tracing-log");
    }
}
