//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{LedgerError, LedgerResult};

/// Install a global subscriber. `RUST_LOG` wins over the configured level.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> LedgerResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.json, config.timestamps) {
        (true, _) => registry.with(fmt::layer().json()).try_init(),
        (false, true) => registry.with(fmt::layer()).try_init(),
        (false, false) => registry.with(fmt::layer().without_time()).try_init(),
    };
    result.map_err(|e| LedgerError::Config(format!("tracing already initialized: {e}")))
}
