use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lockdown::enforcement::LockdownState;
use crate::lockdown::shortcuts::{default_shortcuts, InterceptedShortcut, PlatformScope};
use crate::whitelist::{Whitelist, WhitelistEntry};

/// Kiosk configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KioskConfig {
    #[serde(default)]
    pub session: SessionConfig,

    /// Allowed destinations, `https://host` or `https://*.host`
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,

    #[serde(default)]
    pub lockdown: LockdownConfig,

    #[serde(default)]
    pub shortcuts: ShortcutsConfig,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            whitelist: default_whitelist(),
            lockdown: LockdownConfig::default(),
            shortcuts: ShortcutsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Session length in milliseconds
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LockdownConfig {
    /// Delay before reclaiming focus after the surface loses it
    #[serde(default = "default_focus_grace_ms")]
    pub focus_grace_ms: u64,

    /// Hide the surface from the taskbar while locked
    #[serde(default)]
    pub skip_taskbar: bool,

    /// Keep the display awake while a session is active
    #[serde(default = "default_true")]
    pub prevent_display_sleep: bool,

    /// Clear the surface's cookies and storage before the session starts
    #[serde(default = "default_true")]
    pub clear_browsing_data: bool,
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            focus_grace_ms: default_focus_grace_ms(),
            skip_taskbar: false,
            prevent_display_sleep: true,
            clear_browsing_data: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShortcutsConfig {
    /// Intercept the built-in reload/devtools/quit set
    #[serde(default = "default_true")]
    pub block_defaults: bool,

    /// Extra combinations to intercept on every platform
    #[serde(default)]
    pub additional: Vec<String>,
}

impl Default for ShortcutsConfig {
    fn default() -> Self {
        Self {
            block_defaults: true,
            additional: Vec::new(),
        }
    }
}

/// Longest session a configuration may ask for (one week)
pub const MAX_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

fn default_duration_ms() -> u64 {
    10 * 60 * 1000
}

fn default_focus_grace_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_whitelist() -> Vec<String> {
    [
        "https://www.ixl.com",
        "https://www.google.com",
        "https://www.khanacademy.org",
        "https://*.khanacademy.org",
        "https://*.ixl.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl KioskConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_millis(self.session.duration_ms)
    }

    pub fn focus_grace(&self) -> Duration {
        Duration::from_millis(self.lockdown.focus_grace_ms)
    }

    pub fn whitelist(&self) -> Result<Whitelist> {
        Whitelist::from_patterns(&self.whitelist)
    }

    pub fn locked_state(&self) -> LockdownState {
        LockdownState::locked(self.lockdown.skip_taskbar)
    }

    /// Shortcuts to intercept, defaults first, without duplicates
    pub fn intercepted_shortcuts(&self) -> Vec<InterceptedShortcut> {
        let mut shortcuts = if self.shortcuts.block_defaults {
            default_shortcuts()
        } else {
            Vec::new()
        };

        for combo in &self.shortcuts.additional {
            let combo = combo.trim();
            if !shortcuts.iter().any(|s| s.key_combo == combo) {
                shortcuts.push(InterceptedShortcut::new(combo, PlatformScope::Any));
            }
        }
        shortcuts
    }
}

/// Get the platform-specific config file path
pub fn get_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/lockdown-browser/kiosk.yaml"))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from(
            "/Library/Application Support/lockdown-browser/kiosk.yaml",
        ))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push("lockdown-browser");
        path.push("kiosk.yaml");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        anyhow::bail!("Unsupported operating system");
    }
}

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<KioskConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: KioskConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load the config at `path`, falling back to built-in defaults when it is absent
pub fn load_or_default(path: &Path) -> Result<KioskConfig> {
    if !path.exists() {
        tracing::info!(
            "No config at {}, using built-in defaults",
            path.display()
        );
        return Ok(KioskConfig::default());
    }
    load_config(path)
}

/// Validate configuration
pub fn validate_config(config: &KioskConfig) -> Result<()> {
    if config.session.duration_ms == 0 {
        anyhow::bail!("session.duration_ms must be greater than zero");
    }

    if config.session.duration_ms > MAX_DURATION_MS {
        anyhow::bail!(
            "session.duration_ms must be at most {} (got {})",
            MAX_DURATION_MS,
            config.session.duration_ms
        );
    }

    if config.whitelist.is_empty() {
        anyhow::bail!("Configuration must specify at least one whitelist entry");
    }

    for pattern in &config.whitelist {
        WhitelistEntry::parse(pattern)
            .with_context(|| format!("Invalid whitelist entry '{}'", pattern))?;
    }

    if let Some(blank) = config.shortcuts.additional.iter().find(|c| c.trim().is_empty()) {
        anyhow::bail!("Shortcut combinations must not be empty (got {:?})", blank);
    }

    Ok(())
}

/// Example configuration written by `config init`
pub const EXAMPLE_CONFIG: &str = include_str!("../example-config.yaml");

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Helper to create a temporary YAML config file for testing
    fn create_temp_yaml_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = create_temp_yaml_config("{}\n");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.session.duration_ms, 600_000);
        assert_eq!(config.whitelist.len(), 5);
        assert_eq!(config.lockdown.focus_grace_ms, 100);
        assert!(config.lockdown.prevent_display_sleep);
        assert!(config.lockdown.clear_browsing_data);
        assert!(!config.lockdown.skip_taskbar);
        assert!(config.shortcuts.block_defaults);
    }

    #[test]
    fn default_whitelist_allows_education_sites() {
        let whitelist = KioskConfig::default().whitelist().unwrap();
        assert!(whitelist.is_allowed("https://www.khanacademy.org/math"));
        assert!(whitelist.is_allowed("https://de.khanacademy.org"));
        assert!(whitelist.is_allowed("https://www.ixl.com/math/grade-3"));
        assert!(!whitelist.is_allowed("https://www.youtube.com"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
session:
  duration_ms: 2000
lockdown:
  skip_taskbar: true
"#;
        let file = create_temp_yaml_config(yaml);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.session_duration(), Duration::from_secs(2));
        assert!(config.locked_state().skip_taskbar);
        assert_eq!(config.focus_grace(), Duration::from_millis(100));
        assert!(config.lockdown.clear_browsing_data);
    }

    #[test]
    fn zero_duration_fails_validation() {
        let file = create_temp_yaml_config("session:\n  duration_ms: 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn overlong_duration_fails_validation() {
        let file = create_temp_yaml_config("session:\n  duration_ms: 18446744073709551615\n");
        assert!(load_config(file.path()).is_err());

        let mut config = KioskConfig::default();
        config.session.duration_ms = MAX_DURATION_MS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_whitelist_fails_validation() {
        let file = create_temp_yaml_config("whitelist: []\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn non_https_whitelist_entry_fails_validation() {
        let file = create_temp_yaml_config("whitelist:\n  - http://example.com\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("http://example.com"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = create_temp_yaml_config("session:\n  duraton_ms: 5\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn blank_shortcut_fails_validation() {
        let file = create_temp_yaml_config("shortcuts:\n  additional: ['  ']\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn additional_shortcuts_are_appended_once() {
        let mut config = KioskConfig::default();
        config.shortcuts.additional = vec!["F5".into(), "Control+P".into()];

        let shortcuts = config.intercepted_shortcuts();
        assert_eq!(shortcuts.iter().filter(|s| s.key_combo == "F5").count(), 1);
        assert_eq!(shortcuts.last().unwrap().key_combo, "Control+P");
    }

    #[test]
    fn defaults_can_be_disabled() {
        let mut config = KioskConfig::default();
        config.shortcuts.block_defaults = false;
        assert!(config.intercepted_shortcuts().is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("kiosk.yaml")).unwrap();
        assert_eq!(config.session.duration_ms, 600_000);
    }

    #[test]
    fn example_config_is_valid() {
        let config: KioskConfig = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        validate_config(&config).unwrap();
    }

    #[test]
    fn config_path_names_the_product() {
        let path = get_config_path().unwrap();
        assert!(path.to_string_lossy().contains("lockdown-browser"));
        assert_eq!(path.file_name().unwrap(), "kiosk.yaml");
    }
}
