//! Logger wiring.

use tracing_subscriber::EnvFilter;

use crate::config::{env_vars, LogFormat, LoggerConfig};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false`
/// when a subscriber was already installed, which makes repeated calls
/// (tests, embedded hosts) harmless.
pub fn init(config: &LoggerConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let json = config.format == LogFormat::Json || env_vars::log_json();
    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggerConfig::default();
        let _ = init(&config);
        assert!(!init(&config));
    }
}
