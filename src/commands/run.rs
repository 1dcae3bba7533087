use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{self, KioskConfig};
use crate::host;
use crate::platform::{self, DisplaySleepInhibitor, NoSleepInhibitor, SystemSleepInhibitor};

use super::utils::{format_duration_ms, load_effective_config};

/// Options for `run`
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub duration_ms: Option<u64>,
    pub ui: bool,
    pub lock_file: Option<PathBuf>,
}

/// Start a lockdown session
pub fn run(args: RunArgs) -> Result<()> {
    let config = prepare_config(args.config.as_deref(), args.duration_ms)?;

    let lock_path = args.lock_file.unwrap_or_else(platform::get_instance_lock_path);

    info!(
        "Session length {}, {} whitelist entries",
        format_duration_ms(config.session.duration_ms),
        config.whitelist.len()
    );

    let sleep: Box<dyn DisplaySleepInhibitor> = if config.lockdown.prevent_display_sleep {
        Box::new(SystemSleepInhibitor::new())
    } else {
        Box::new(NoSleepInhibitor)
    };

    if args.ui {
        // The window takes the lock itself, after a second launch has had the
        // chance to hand off to the running window
        run_ui(config, sleep, lock_path)
    } else {
        let lock = platform::acquire_instance_lock(&lock_path)?;
        info!("Holding instance lock at {}", lock.path().display());
        run_stdio(config, sleep)
    }
}

/// Load the configuration and apply command-line overrides
fn prepare_config(path: Option<&Path>, duration_ms: Option<u64>) -> Result<KioskConfig> {
    let mut config = load_effective_config(path).context("Failed to load configuration")?;

    if let Some(duration_ms) = duration_ms {
        config.session.duration_ms = duration_ms;
        config::validate_config(&config).context("Invalid --duration-ms")?;
    }

    Ok(config)
}

fn run_stdio(config: KioskConfig, sleep: Box<dyn DisplaySleepInhibitor>) -> Result<()> {
    // Single thread: the Windows execution state belongs to the thread that set it
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(async {
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        host::serve_stdio(&config, sleep, input, tokio::io::stdout()).await
    })
}

#[cfg(feature = "ui")]
fn run_ui(
    config: KioskConfig,
    sleep: Box<dyn DisplaySleepInhibitor>,
    lock_path: PathBuf,
) -> Result<()> {
    crate::ui::run(config, sleep, lock_path)
}

#[cfg(not(feature = "ui"))]
fn run_ui(
    _config: KioskConfig,
    _sleep: Box<dyn DisplaySleepInhibitor>,
    _lock_path: PathBuf,
) -> Result<()> {
    anyhow::bail!("This build has no webview window. Rebuild with `--features ui` or drop --ui.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn duration_override_is_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{}\n").unwrap();

        let config = prepare_config(Some(file.path()), Some(2_000)).unwrap();
        assert_eq!(config.session.duration_ms, 2_000);

        assert!(prepare_config(Some(file.path()), Some(0)).is_err());
    }
}
