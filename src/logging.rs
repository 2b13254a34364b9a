//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies.

use tracing_subscriber::EnvFilter;

use crate::error::{AppResult, PanelError};

/// Build a filter from a level or directive string such as `info` or
/// `scraper_panel=debug,warn`.
pub fn filter_for(level: &str) -> AppResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| PanelError::Configuration(format!("invalid log level '{level}': {e}")))
}

/// Install the global fmt subscriber, logging to stderr.
///
/// Calling this more than once is harmless; only the first call installs.
pub fn init(default_level: &str) -> AppResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(default_level)?,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
