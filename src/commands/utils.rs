use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::{self, KioskConfig};

/// Initialize logging
///
/// Logs go to stderr; stdout belongs to the stdio bridge protocol.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Resolve the config path given on the command line or the platform default
pub fn resolve_config_path(config: Option<&Path>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path.to_path_buf()),
        None => config::get_config_path(),
    }
}

/// Load the effective configuration
///
/// An explicitly named file must exist; the platform default may be absent.
pub fn load_effective_config(config: Option<&Path>) -> Result<KioskConfig> {
    match config {
        Some(path) => config::load_config(path),
        None => config::load_or_default(&config::get_config_path()?),
    }
}

/// Format a millisecond duration for display
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
