//! Controller host traits backed by a Tauri webview window

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tauri::{AppHandle, Emitter, Runtime, WebviewWindow};
use tauri_plugin_global_shortcut::{GlobalShortcutExt, Shortcut};

use crate::channel::{SurfaceEvent, SurfaceSink};
use crate::lockdown::enforcement::WindowHost;
use crate::lockdown::shortcuts::ShortcutHost;

/// Registered hotkey ids mapped back to the combination they were registered as
pub type ShortcutIds = Arc<Mutex<HashMap<u32, String>>>;

pub struct TauriWindow<R: Runtime> {
    window: WebviewWindow<R>,
    destroyed: Arc<AtomicBool>,
}

impl<R: Runtime> TauriWindow<R> {
    pub fn new(window: WebviewWindow<R>, destroyed: Arc<AtomicBool>) -> Self {
        Self { window, destroyed }
    }
}

impl<R: Runtime> WindowHost for TauriWindow<R> {
    fn set_always_on_top(&mut self, on_top: bool) -> Result<()> {
        Ok(self.window.set_always_on_top(on_top)?)
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        Ok(self.window.set_fullscreen(fullscreen)?)
    }

    fn set_closable(&mut self, closable: bool) -> Result<()> {
        Ok(self.window.set_closable(closable)?)
    }

    fn set_skip_taskbar(&mut self, skip: bool) -> Result<()> {
        Ok(self.window.set_skip_taskbar(skip)?)
    }

    fn show(&mut self) -> Result<()> {
        Ok(self.window.show()?)
    }

    fn hide(&mut self) -> Result<()> {
        Ok(self.window.hide()?)
    }

    fn focus(&mut self) -> Result<()> {
        Ok(self.window.set_focus()?)
    }

    fn restore(&mut self) -> Result<()> {
        Ok(self.window.unminimize()?)
    }

    fn clear_browsing_data(&mut self) -> Result<()> {
        Ok(self.window.clear_all_browsing_data()?)
    }

    fn is_focused(&self) -> bool {
        self.window.is_focused().unwrap_or(false)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct TauriShortcuts<R: Runtime> {
    app: AppHandle<R>,
    ids: ShortcutIds,
}

impl<R: Runtime> TauriShortcuts<R> {
    pub fn new(app: AppHandle<R>, ids: ShortcutIds) -> Self {
        Self { app, ids }
    }
}

impl<R: Runtime> ShortcutHost for TauriShortcuts<R> {
    fn register(&mut self, key_combo: &str) -> Result<()> {
        let shortcut: Shortcut = key_combo
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid shortcut '{}': {}", key_combo, e))?;
        self.app.global_shortcut().register(shortcut)?;
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(shortcut.id(), key_combo.to_string());
        Ok(())
    }

    fn unregister_all(&mut self) -> Result<()> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(self.app.global_shortcut().unregister_all()?)
    }
}

/// Delivers surface events as Tauri events on the webview
pub struct TauriSurface<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> TauriSurface<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self { app }
    }
}

impl<R: Runtime> SurfaceSink for TauriSurface<R> {
    fn push(&self, event: SurfaceEvent) {
        if let Err(e) = self.app.emit(event.name(), event.payload()) {
            tracing::debug!("Failed to emit {}: {}", event.name(), e);
        }
    }
}
