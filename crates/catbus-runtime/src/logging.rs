//! Tracing subscriber setup

use catbus_core::{CatbusError, CatbusResult};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::LogConfig;

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> CatbusResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| CatbusError::Config(format!("Invalid log level {:?}: {}", config.level, e)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| CatbusError::Config(e.to_string()))
}
