use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{SurfaceEvent, SurfaceSink};

/// Presentation constraints applied to the display surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockdownState {
    pub always_on_top: bool,
    pub fullscreen: bool,
    pub closable: bool,
    pub skip_taskbar: bool,
}

impl LockdownState {
    /// Constraints held while a session is active
    pub fn locked(skip_taskbar: bool) -> Self {
        Self {
            always_on_top: true,
            fullscreen: true,
            closable: false,
            skip_taskbar,
        }
    }

    /// Constraints after the session has ended
    pub fn released() -> Self {
        Self {
            always_on_top: false,
            fullscreen: false,
            closable: true,
            skip_taskbar: false,
        }
    }
}

/// Window-manager operations the enforcer needs from the host
///
/// Every setter may be refused by the host; refusals come back as errors and
/// are treated as degraded enforcement, never as fatal.
pub trait WindowHost: Send {
    fn set_always_on_top(&mut self, on_top: bool) -> Result<()>;
    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()>;
    fn set_closable(&mut self, closable: bool) -> Result<()>;
    fn set_skip_taskbar(&mut self, skip: bool) -> Result<()>;
    fn show(&mut self) -> Result<()>;
    fn hide(&mut self) -> Result<()>;
    fn focus(&mut self) -> Result<()>;
    fn restore(&mut self) -> Result<()>;
    fn clear_browsing_data(&mut self) -> Result<()>;
    fn is_focused(&self) -> bool;
    fn is_destroyed(&self) -> bool;
}

/// Lifecycle event reported by the host window manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowEvent {
    FocusLost,
    FocusGained,
    MinimizeAttempted,
    FullscreenExitAttempted,
    CloseAttempted,
    /// Tray click, app activation, or a second launch
    ShowRequested,
    /// An exit control was invoked
    ExitRequested,
}

/// Whether the host should let the default effect of an event happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Allow,
    Veto,
}

/// Result of handling a window event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaction {
    pub disposition: Disposition,
    /// The controller should re-check focus after the grace delay
    pub schedule_refocus: bool,
}

impl Reaction {
    fn allow() -> Self {
        Self {
            disposition: Disposition::Allow,
            schedule_refocus: false,
        }
    }

    fn veto() -> Self {
        Self {
            disposition: Disposition::Veto,
            schedule_refocus: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Standby,
    Enforcing,
    Released,
}

/// Keeps the lockdown presentation asserted while a session is active
pub struct LockdownEnforcer {
    window: Box<dyn WindowHost>,
    locked: LockdownState,
    state: LockdownState,
    phase: Phase,
}

impl LockdownEnforcer {
    pub fn new(window: Box<dyn WindowHost>, locked: LockdownState) -> Self {
        Self {
            window,
            locked,
            state: locked,
            phase: Phase::Standby,
        }
    }

    pub fn state(&self) -> LockdownState {
        self.state
    }

    pub fn is_enforcing(&self) -> bool {
        self.phase == Phase::Enforcing
    }

    /// Clear the surface's isolated data store before anything is loaded
    pub fn prepare_surface(&mut self) {
        if self.window.is_destroyed() {
            return;
        }
        match self.window.clear_browsing_data() {
            Ok(()) => debug!("Cleared display surface browsing data"),
            Err(e) => warn!("Failed to clear display surface browsing data: {:#}", e),
        }
    }

    /// Start enforcing: apply the locked state and bring the surface forward
    pub fn engage(&mut self) {
        if self.phase != Phase::Standby {
            debug!("Lockdown already {:?}, not engaging", self.phase);
            return;
        }

        info!("Engaging lockdown");
        self.phase = Phase::Enforcing;
        self.state = self.locked;
        self.reassert();
        self.attempt("show", |w| w.show());
        self.attempt("focus", |w| w.focus());
    }

    /// React to a window-manager event
    pub fn handle(&mut self, event: WindowEvent, surface: &dyn SurfaceSink) -> Reaction {
        if self.window.is_destroyed() {
            debug!("Ignoring {:?}: display surface is destroyed", event);
            return Reaction::allow();
        }

        if !self.is_enforcing() {
            if event == WindowEvent::ShowRequested {
                self.attempt("show", |w| w.show());
                self.attempt("focus", |w| w.focus());
            }
            return Reaction::allow();
        }

        match event {
            WindowEvent::FocusLost => Reaction {
                disposition: Disposition::Allow,
                schedule_refocus: true,
            },
            WindowEvent::FocusGained => Reaction::allow(),
            WindowEvent::MinimizeAttempted => {
                info!("Vetoed minimize");
                self.attempt("restore", |w| w.restore());
                self.reassert();
                Reaction::veto()
            }
            WindowEvent::FullscreenExitAttempted => {
                info!("Vetoed fullscreen exit");
                self.reassert();
                Reaction::veto()
            }
            WindowEvent::CloseAttempted => {
                info!("Vetoed close, hiding display surface");
                self.attempt("hide", |w| w.hide());
                surface.push(SurfaceEvent::CloseAttempted);
                Reaction::veto()
            }
            WindowEvent::ShowRequested => {
                self.attempt("show", |w| w.show());
                self.attempt("focus", |w| w.focus());
                self.attempt("fullscreen", |w| w.set_fullscreen(true));
                Reaction::allow()
            }
            WindowEvent::ExitRequested => {
                info!("Exit requested during active session");
                surface.push(SurfaceEvent::AdminExitRequest);
                Reaction::veto()
            }
        }
    }

    /// Pull focus back once the grace delay after a focus loss has passed
    pub fn reassert_focus(&mut self) {
        if !self.is_enforcing() || self.window.is_destroyed() {
            return;
        }
        if self.window.is_focused() {
            debug!("Display surface regained focus on its own");
            return;
        }

        info!("Reclaiming focus for display surface");
        self.attempt("focus", |w| w.focus());
        self.attempt("fullscreen", |w| w.set_fullscreen(true));
    }

    /// Drop every constraint. Happens once; enforcement never re-arms.
    pub fn release(&mut self) {
        if self.phase == Phase::Released {
            return;
        }

        info!("Releasing lockdown");
        self.phase = Phase::Released;
        self.state = LockdownState::released();
        self.apply_state();
    }

    /// Push the full locked state back onto the window
    fn reassert(&mut self) {
        self.state = self.locked;
        self.apply_state();
    }

    fn apply_state(&mut self) {
        if self.window.is_destroyed() {
            debug!("Display surface is destroyed, skipping state apply");
            return;
        }

        let state = self.state;
        self.attempt("closable", |w| w.set_closable(state.closable));
        self.attempt("always-on-top", |w| w.set_always_on_top(state.always_on_top));
        self.attempt("fullscreen", |w| w.set_fullscreen(state.fullscreen));
        self.attempt("skip-taskbar", |w| w.set_skip_taskbar(state.skip_taskbar));
    }

    fn attempt(&mut self, what: &str, op: impl FnOnce(&mut dyn WindowHost) -> Result<()>) {
        if let Err(e) = op(self.window.as_mut()) {
            warn!("Host refused {} change: {:#}", what, e);
        }
    }
}
