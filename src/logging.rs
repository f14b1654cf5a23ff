//! Tracing subscriber bootstrap.

use crate::types::{EncinaError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber with the given filter string.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level).map_err(|_| EncinaError::Invalid("invalid log filter"))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| EncinaError::Invalid("logging already initialized"))
}
