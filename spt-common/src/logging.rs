//! Tracing subscriber initialization
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for a single run without editing the config file.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the level filter for the given config
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber (stderr, or the configured log file)
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config);

    match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
                .map_err(|e| Error::Internal(format!("Logging init failed: {}", e)))
        }
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Internal(format!("Logging init failed: {}", e))),
    }
}
