/// Platform-specific helpers: display sleep inhibition and the instance lock

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
mod linux;

pub mod common;

use anyhow::Result;
use tracing::{debug, info, warn};

pub use common::{acquire_instance_lock, get_instance_lock_path};

/// Keeps the display awake while a session is active
pub trait DisplaySleepInhibitor: Send {
    fn inhibit(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Inhibitor backed by the operating system's power management
#[derive(Debug, Default)]
pub struct SystemSleepInhibitor {
    guard: Option<InhibitGuard>,
}

impl SystemSleepInhibitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySleepInhibitor for SystemSleepInhibitor {
    fn inhibit(&mut self) -> Result<()> {
        if self.guard.is_some() {
            debug!("Display sleep already inhibited");
            return Ok(());
        }
        self.guard = Some(start_inhibit()?);
        info!("Display sleep inhibited for the session");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        match self.guard.take() {
            Some(guard) => {
                stop_inhibit(guard)?;
                info!("Display sleep inhibition released");
            }
            None => debug!("Display sleep was not inhibited"),
        }
        Ok(())
    }
}

impl Drop for SystemSleepInhibitor {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release display sleep inhibition: {:#}", e);
        }
    }
}

/// Inhibitor used when the configuration turns the feature off
#[derive(Debug, Default)]
pub struct NoSleepInhibitor;

impl DisplaySleepInhibitor for NoSleepInhibitor {
    fn inhibit(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
type InhibitGuard = std::process::Child;

#[cfg(target_os = "windows")]
type InhibitGuard = windows::ExecutionStateGuard;

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
type InhibitGuard = ();

fn start_inhibit() -> Result<InhibitGuard> {
    #[cfg(target_os = "windows")]
    {
        windows::start_inhibit()
    }

    #[cfg(target_os = "macos")]
    {
        macos::start_inhibit()
    }

    #[cfg(target_os = "linux")]
    {
        linux::start_inhibit()
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        anyhow::bail!("Unsupported operating system for display sleep inhibition")
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn stop_inhibit(mut child: InhibitGuard) -> Result<()> {
    use anyhow::Context;

    // The helper may already have exited on its own
    if child.try_wait().context("Failed to poll inhibitor process")?.is_none() {
        child.kill().context("Failed to stop inhibitor process")?;
    }
    child.wait().context("Failed to reap inhibitor process")?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn stop_inhibit(guard: InhibitGuard) -> Result<()> {
    windows::stop_inhibit(guard)
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
fn stop_inhibit(_guard: InhibitGuard) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_without_inhibit_is_harmless() {
        let mut inhibitor = SystemSleepInhibitor::new();
        assert!(inhibitor.release().is_ok());
        assert!(inhibitor.release().is_ok());
    }

    #[test]
    fn no_inhibitor_always_succeeds() {
        let mut inhibitor = NoSleepInhibitor;
        assert!(inhibitor.inhibit().is_ok());
        assert!(inhibitor.release().is_ok());
    }
}
