//! File logging. The terminal belongs to the table, so everything goes to a
//! log file instead of stderr.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::{SVConfig, SVError};

/// Used when RUST_LOG is not set.
pub const DEFAULT_FILTER: &str = "info";

pub fn default_log_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sv")
        .join("sv.log")
}

/// Install the global subscriber and return the file it writes to.
pub fn init(config: &SVConfig) -> Result<PathBuf, SVError> {
    let path = config.log_file.clone().unwrap_or_else(default_log_file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(false)
        .with_writer(Arc::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| SVError::Io(io::Error::other(e.to_string())))?;

    tracing::info!(log_file = %path.display(), "sv {} started", env!("CARGO_PKG_VERSION"));
    Ok(path)
}
