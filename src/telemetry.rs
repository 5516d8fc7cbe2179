use crate::config::LoggingConfig;
use crate::utils::error::{PoolError, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` is not consulted: the configured level is the filter, so it can
/// be a plain level ("debug") or a full directive ("keepalive_pool=trace").
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.level)
        .map_err(|e| PoolError::Config(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        _ => registry.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| PoolError::Config(format!("Failed to install logger: {}", e)))
}
