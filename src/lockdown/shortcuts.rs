use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::channel::{SurfaceEvent, SurfaceSink};

/// Platforms a shortcut applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformScope {
    #[default]
    Any,
    Macos,
    NonMacos,
}

impl PlatformScope {
    pub fn applies_here(self) -> bool {
        match self {
            PlatformScope::Any => true,
            PlatformScope::Macos => cfg!(target_os = "macos"),
            PlatformScope::NonMacos => !cfg!(target_os = "macos"),
        }
    }
}

/// A key combination swallowed while a session is active
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InterceptedShortcut {
    pub key_combo: String,
    #[serde(default)]
    pub platform_scope: PlatformScope,
}

impl InterceptedShortcut {
    pub fn new(key_combo: &str, platform_scope: PlatformScope) -> Self {
        Self {
            key_combo: key_combo.to_string(),
            platform_scope,
        }
    }
}

/// Reload, devtools, new window/tab, fullscreen toggle, and quit combinations
pub fn default_shortcuts() -> Vec<InterceptedShortcut> {
    const ANY: &[&str] = &[
        "CommandOrControl+R",
        "CommandOrControl+Shift+R",
        "F5",
        "F11",
        "CommandOrControl+N",
        "CommandOrControl+T",
        "CommandOrControl+Shift+N",
        "CommandOrControl+Shift+I",
        "CommandOrControl+W",
        "CommandOrControl+Q",
        "Escape",
    ];
    const MACOS: &[&str] = &["Command+H", "Command+Option+H", "Command+Shift+Q"];
    const NON_MACOS: &[&str] = &["Alt+F4"];

    let scoped = |combos: &[&str], scope| {
        combos
            .iter()
            .map(move |c| InterceptedShortcut::new(c, scope))
            .collect::<Vec<_>>()
    };

    let mut shortcuts = scoped(ANY, PlatformScope::Any);
    shortcuts.extend(scoped(MACOS, PlatformScope::Macos));
    shortcuts.extend(scoped(NON_MACOS, PlatformScope::NonMacos));
    shortcuts
}

/// OS-level hotkey registration provided by the host
pub trait ShortcutHost: Send {
    fn register(&mut self, key_combo: &str) -> Result<()>;
    fn unregister_all(&mut self) -> Result<()>;
}

/// Per-combination outcome of activating the interceptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RegistrationReport {
    results: BTreeMap<String, bool>,
}

impl RegistrationReport {
    pub fn registered(&self) -> Vec<&str> {
        self.filter(true)
    }

    pub fn refused(&self) -> Vec<&str> {
        self.filter(false)
    }

    fn filter(&self, registered: bool) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, ok)| **ok == registered)
            .map(|(combo, _)| combo.as_str())
            .collect()
    }
}

/// Swallows a fixed set of hotkeys for the duration of a session
pub struct ShortcutInterceptor {
    host: Box<dyn ShortcutHost>,
    shortcuts: Vec<InterceptedShortcut>,
    active: bool,
}

impl ShortcutInterceptor {
    pub fn new(host: Box<dyn ShortcutHost>, shortcuts: Vec<InterceptedShortcut>) -> Self {
        Self {
            host,
            shortcuts,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Register every shortcut for this platform, best effort
    pub fn activate(&mut self) -> RegistrationReport {
        if let Err(e) = self.host.unregister_all() {
            warn!("Failed to clear existing shortcuts: {:#}", e);
        }

        let mut report = RegistrationReport::default();
        info!("Registering shortcuts that can be blocked");

        for shortcut in self.shortcuts.iter().filter(|s| s.platform_scope.applies_here()) {
            let registered = match self.host.register(&shortcut.key_combo) {
                Ok(()) => {
                    debug!("Registered: {}", shortcut.key_combo);
                    true
                }
                Err(e) => {
                    warn!("Failed to register {} (OS restricted): {:#}", shortcut.key_combo, e);
                    false
                }
            };
            report.results.insert(shortcut.key_combo.clone(), registered);
        }

        info!(
            "Intercepting {} of {} shortcuts",
            report.registered().len(),
            report.results.len()
        );
        self.active = true;
        report
    }

    /// Tell the surface a shortcut was swallowed
    pub fn on_intercepted(&self, key_combo: &str, surface: &dyn SurfaceSink) {
        if !self.is_active() {
            debug!("Shortcut {} pressed outside a session", key_combo);
            return;
        }
        info!("Blocked shortcut: {}", key_combo);
        surface.push(SurfaceEvent::ShortcutBlocked(key_combo.to_string()));
    }

    pub fn deactivate(&mut self) {
        if !self.is_active() {
            return;
        }
        self.active = false;
        match self.host.unregister_all() {
            Ok(()) => info!("Unregistered all shortcuts"),
            Err(e) => warn!("Failed to unregister shortcuts: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::headless::HeadlessShortcuts;
    use tokio::sync::mpsc;

    #[test]
    fn defaults_cover_reload_devtools_and_quit() {
        let combos: Vec<String> = default_shortcuts().into_iter().map(|s| s.key_combo).collect();
        for combo in ["F5", "CommandOrControl+Shift+I", "CommandOrControl+Q", "Alt+F4"] {
            assert!(combos.iter().any(|c| c == combo), "missing {combo}");
        }
    }

    #[test]
    fn scope_filters_platform_specific_combos() {
        assert!(PlatformScope::Any.applies_here());
        assert_ne!(
            PlatformScope::Macos.applies_here(),
            PlatformScope::NonMacos.applies_here()
        );
    }

    #[test]
    fn partial_registration_is_reported_not_fatal() {
        let host = HeadlessShortcuts::refusing(&["Alt+F4", "F11"]);
        let registry = host.registry();
        let mut interceptor = ShortcutInterceptor::new(
            Box::new(host),
            vec![
                InterceptedShortcut::new("F5", PlatformScope::Any),
                InterceptedShortcut::new("F11", PlatformScope::Any),
                InterceptedShortcut::new("Alt+F4", PlatformScope::Any),
            ],
        );

        let report = interceptor.activate();

        assert!(interceptor.is_active());
        assert_eq!(report.registered(), vec!["F5"]);
        assert_eq!(report.refused(), vec!["Alt+F4", "F11"]);
        assert_eq!(registry.lock().unwrap().registered, vec!["F5".to_string()]);
    }

    #[test]
    fn out_of_scope_shortcuts_are_not_registered() {
        let mut interceptor = ShortcutInterceptor::new(
            Box::new(HeadlessShortcuts::new()),
            vec![
                InterceptedShortcut::new("Command+H", PlatformScope::Macos),
                InterceptedShortcut::new("Alt+F4", PlatformScope::NonMacos),
            ],
        );
        let report = interceptor.activate();
        assert_eq!(report.registered().len() + report.refused().len(), 1);
    }

    #[test]
    fn intercepted_press_is_reported_only_while_active() {
        let mut interceptor =
            ShortcutInterceptor::new(Box::new(HeadlessShortcuts::new()), default_shortcuts());
        let (tx, mut rx) = mpsc::unbounded_channel();

        interceptor.on_intercepted("F5", &tx);
        assert!(rx.try_recv().is_err());

        interceptor.activate();
        interceptor.on_intercepted("F5", &tx);
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::ShortcutBlocked("F5".into()));

        interceptor.deactivate();
        interceptor.on_intercepted("F5", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn deactivate_unregisters_everything() {
        let host = HeadlessShortcuts::new();
        let registry = host.registry();
        let mut interceptor = ShortcutInterceptor::new(Box::new(host), default_shortcuts());

        interceptor.activate();
        assert!(!registry.lock().unwrap().registered.is_empty());

        interceptor.deactivate();
        assert!(registry.lock().unwrap().registered.is_empty());
        assert!(!interceptor.is_active());
    }
}
