//! In-process host model used by the stdio bridge and by tests
//!
//! `HeadlessWindow` keeps a virtual model of the display surface's window and
//! optionally mirrors every change as a [`WindowCommand`] for an external
//! renderer to apply.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::lockdown::enforcement::WindowHost;
use crate::lockdown::shortcuts::ShortcutHost;

/// Window state as the host would see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisplay {
    pub always_on_top: bool,
    pub fullscreen: bool,
    pub closable: bool,
    pub skip_taskbar: bool,
    pub visible: bool,
    pub focused: bool,
    pub minimized: bool,
    pub destroyed: bool,
    pub storage_cleared: bool,
    /// Simulate a window manager that will not grant always-on-top
    pub refuse_always_on_top: bool,
}

impl Default for VirtualDisplay {
    fn default() -> Self {
        Self {
            always_on_top: false,
            fullscreen: false,
            closable: true,
            skip_taskbar: false,
            visible: false,
            focused: false,
            minimized: false,
            destroyed: false,
            storage_cleared: false,
            refuse_always_on_top: false,
        }
    }
}

/// A window operation mirrored to an external renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "value", rename_all = "kebab-case")]
pub enum WindowCommand {
    SetAlwaysOnTop(bool),
    SetFullscreen(bool),
    SetClosable(bool),
    SetSkipTaskbar(bool),
    Show,
    Hide,
    Focus,
    Restore,
    ClearBrowsingData,
}

/// Window host backed by a [`VirtualDisplay`]
#[derive(Debug, Default)]
pub struct HeadlessWindow {
    display: Arc<Mutex<VirtualDisplay>>,
    outlet: Option<mpsc::UnboundedSender<WindowCommand>>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every applied change to `outlet`
    pub fn with_outlet(outlet: mpsc::UnboundedSender<WindowCommand>) -> Self {
        Self {
            display: Arc::default(),
            outlet: Some(outlet),
        }
    }

    /// Shared handle to the model, for the transport and for inspection
    pub fn display(&self) -> Arc<Mutex<VirtualDisplay>> {
        Arc::clone(&self.display)
    }

    fn model(&self) -> MutexGuard<'_, VirtualDisplay> {
        // A poisoned model is still the best description of the window we have
        self.display.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&mut self, command: WindowCommand) -> Result<()> {
        {
            let mut display = self.model();
            if display.destroyed {
                anyhow::bail!("Display surface is destroyed");
            }
            match command {
                WindowCommand::SetAlwaysOnTop(_) if display.refuse_always_on_top => {
                    anyhow::bail!("Window manager refused always-on-top");
                }
                WindowCommand::SetAlwaysOnTop(on) => display.always_on_top = on,
                WindowCommand::SetFullscreen(on) => {
                    display.fullscreen = on;
                    if on {
                        display.minimized = false;
                    }
                }
                WindowCommand::SetClosable(closable) => display.closable = closable,
                WindowCommand::SetSkipTaskbar(skip) => display.skip_taskbar = skip,
                WindowCommand::Show => display.visible = true,
                WindowCommand::Hide => {
                    display.visible = false;
                    display.focused = false;
                }
                WindowCommand::Focus => {
                    display.visible = true;
                    display.focused = true;
                }
                WindowCommand::Restore => display.minimized = false,
                WindowCommand::ClearBrowsingData => display.storage_cleared = true,
            }
        }

        debug!("Window command: {:?}", command);
        if let Some(outlet) = &self.outlet {
            let _ = outlet.send(command);
        }
        Ok(())
    }
}

impl WindowHost for HeadlessWindow {
    fn set_always_on_top(&mut self, on_top: bool) -> Result<()> {
        self.apply(WindowCommand::SetAlwaysOnTop(on_top))
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.apply(WindowCommand::SetFullscreen(fullscreen))
    }

    fn set_closable(&mut self, closable: bool) -> Result<()> {
        self.apply(WindowCommand::SetClosable(closable))
    }

    fn set_skip_taskbar(&mut self, skip: bool) -> Result<()> {
        self.apply(WindowCommand::SetSkipTaskbar(skip))
    }

    fn show(&mut self) -> Result<()> {
        self.apply(WindowCommand::Show)
    }

    fn hide(&mut self) -> Result<()> {
        self.apply(WindowCommand::Hide)
    }

    fn focus(&mut self) -> Result<()> {
        self.apply(WindowCommand::Focus)
    }

    fn restore(&mut self) -> Result<()> {
        self.apply(WindowCommand::Restore)
    }

    fn clear_browsing_data(&mut self) -> Result<()> {
        self.apply(WindowCommand::ClearBrowsingData)
    }

    fn is_focused(&self) -> bool {
        self.model().focused
    }

    fn is_destroyed(&self) -> bool {
        self.model().destroyed
    }
}

/// Registered combinations as seen by the host
#[derive(Debug, Default)]
pub struct ShortcutRegistry {
    pub registered: Vec<String>,
}

/// Shortcut host that records registrations and can refuse some of them
#[derive(Debug, Default)]
pub struct HeadlessShortcuts {
    refused: HashSet<String>,
    registry: Arc<Mutex<ShortcutRegistry>>,
}

impl HeadlessShortcuts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an OS that reserves `combos` for itself
    pub fn refusing(combos: &[&str]) -> Self {
        Self {
            refused: combos.iter().map(|c| c.to_string()).collect(),
            registry: Arc::default(),
        }
    }

    pub fn registry(&self) -> Arc<Mutex<ShortcutRegistry>> {
        Arc::clone(&self.registry)
    }

    fn lock(&self) -> MutexGuard<'_, ShortcutRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ShortcutHost for HeadlessShortcuts {
    fn register(&mut self, key_combo: &str) -> Result<()> {
        if self.refused.contains(key_combo) {
            anyhow::bail!("'{}' is reserved by the operating system", key_combo);
        }
        let mut registry = self.lock();
        if !registry.registered.iter().any(|c| c == key_combo) {
            registry.registered.push(key_combo.to_string());
        }
        Ok(())
    }

    fn unregister_all(&mut self) -> Result<()> {
        self.lock().registered.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_starts_hidden_and_closable() {
        let window = HeadlessWindow::new();
        {
            let display = window.display();
            let d = display.lock().unwrap();
            assert!(!d.visible);
            assert!(d.closable);
        }
        assert!(!window.is_focused());
    }

    #[test]
    fn commands_are_mirrored_to_outlet() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut window = HeadlessWindow::with_outlet(tx);

        window.set_fullscreen(true).unwrap();
        window.hide().unwrap();

        assert_eq!(rx.try_recv().unwrap(), WindowCommand::SetFullscreen(true));
        assert_eq!(rx.try_recv().unwrap(), WindowCommand::Hide);
    }

    #[test]
    fn refused_changes_are_not_mirrored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut window = HeadlessWindow::with_outlet(tx);
        window.display().lock().unwrap().refuse_always_on_top = true;

        assert!(window.set_always_on_top(true).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn destroyed_window_rejects_commands() {
        let mut window = HeadlessWindow::new();
        window.display().lock().unwrap().destroyed = true;
        assert!(window.focus().is_err());
        assert!(window.is_destroyed());
    }

    #[test]
    fn window_command_wire_form() {
        assert_eq!(
            serde_json::to_value(WindowCommand::SetFullscreen(true)).unwrap(),
            serde_json::json!({"command": "set-fullscreen", "value": true})
        );
        assert_eq!(
            serde_json::to_value(WindowCommand::Hide).unwrap(),
            serde_json::json!({"command": "hide"})
        );
    }

    #[test]
    fn shortcuts_registry_deduplicates() {
        let mut shortcuts = HeadlessShortcuts::new();
        shortcuts.register("F5").unwrap();
        shortcuts.register("F5").unwrap();
        assert_eq!(shortcuts.registry().lock().unwrap().registered, vec!["F5"]);
    }
}
