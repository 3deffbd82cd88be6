//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber writing to stderr, so stdout stays
//! clean for command output. `RUST_LOG` wins over the configured level; each
//! `-v` flag raises the level one step above it.

use anyhow::{anyhow, Result};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Level after applying `verbose` steps to `base`.
pub fn effective_level(base: &str, verbose: u8) -> String {
    let base = base.trim().to_ascii_lowercase();
    match LEVELS.iter().position(|l| *l == base) {
        Some(pos) => LEVELS[(pos + verbose as usize).min(LEVELS.len() - 1)].to_string(),
        // Not a bare level (e.g. a directive like "hybrid_search=debug").
        None => base,
    }
}

pub fn init_logging(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let level = effective_level(&config.level, verbose);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            ),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            ),
        ),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
