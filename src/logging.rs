//! Subscriber bootstrap for the `tracing` events emitted by the storage layer.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, TramaError};

/// Installs a global fmt subscriber filtered by `level`, which accepts any
/// `EnvFilter` directive such as `"debug"` or `"trama::storage=trace"`.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_new(level).map_err(|_| TramaError::Invalid("invalid log level"))?)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| TramaError::Invalid("logging already initialized"))
}
