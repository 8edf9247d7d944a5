//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when neither `RUST_LOG` nor `WANG_LOG_LEVEL` is set
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize the global logging system.
///
/// `RUST_LOG` wins when present; otherwise `WANG_LOG_LEVEL` (default
/// `info`) is used as the filter. Safe to call more than once; only the
/// first call installs a subscriber.
pub fn init_logging() {
    let level = std::env::var("WANG_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        tracing::info!("logging initialised");
    }
}
