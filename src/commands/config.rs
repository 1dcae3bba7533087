use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, EXAMPLE_CONFIG};
use crate::platform::common::atomic_write;

use super::utils::{format_duration_ms, load_effective_config, resolve_config_path};

/// Write the example configuration file
pub fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output_path = match output {
        Some(path) => path,
        None => config::get_config_path().unwrap_or_else(|_| PathBuf::from("kiosk.yaml")),
    };

    if output_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output_path.display()
        );
    }

    atomic_write(&output_path, EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", output_path.display()))?;

    println!("✓ Created kiosk configuration file: {}", output_path.display());
    println!("\nEdit the whitelist and session length, then start a session:");
    println!("  lockdown-browser run");

    Ok(())
}

/// Print the effective configuration
pub fn show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = load_effective_config(config_path)?;

    println!("Lockdown Browser Configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if path.exists() {
        println!("Source:    {}", path.display());
    } else {
        println!("Source:    built-in defaults ({} not found)", path.display());
    }
    println!("Session:   {}", format_duration_ms(config.session.duration_ms));
    println!();
    println!("Whitelist:");
    for entry in &config.whitelist {
        println!("  - {}", entry);
    }
    println!();
    println!("Lockdown:");
    println!("  Focus grace:        {}ms", config.lockdown.focus_grace_ms);
    println!("  Skip taskbar:       {}", config.lockdown.skip_taskbar);
    println!("  Keep display awake: {}", config.lockdown.prevent_display_sleep);
    println!("  Clear browsing data: {}", config.lockdown.clear_browsing_data);
    println!();
    println!("Intercepted shortcuts:");
    for shortcut in config.intercepted_shortcuts() {
        if shortcut.platform_scope.applies_here() {
            println!("  - {}", shortcut.key_combo);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_valid_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.yaml");

        init(Some(path.clone()), false).unwrap();

        let written = config::load_config(&path).unwrap();
        assert_eq!(written.session.duration_ms, 600_000);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.yaml");
        std::fs::write(&path, "session: {}\n").unwrap();

        assert!(init(Some(path.clone()), false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "session: {}\n");

        init(Some(path.clone()), true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), EXAMPLE_CONFIG);
    }
}
