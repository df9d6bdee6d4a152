//! Structured logging for polymix
//!
//! Logs go to stderr so stdout stays clean for `--list-modules` style
//! output. `RUST_LOG` overrides the level passed by the CLI.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Initialize the global tracing subscriber once at startup.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| Error::config(format!("invalid log level '{level}': {err}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| Error::config(format!("logging setup failed: {err}")))
}
