use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::enforcement::{Disposition, LockdownEnforcer, LockdownState, WindowEvent, WindowHost};
use super::session::{EndReason, SessionState, SessionTimer, TICK_PERIOD};
use super::shortcuts::{RegistrationReport, ShortcutHost, ShortcutInterceptor};
use crate::channel::{ConfigView, SurfaceEvent, SurfaceRequest, SurfaceResponse, SurfaceSink};
use crate::config::KioskConfig;
use crate::navigation::{NavigationFilter, NavigationRequest, ResourceKind};
use crate::platform::DisplaySleepInhibitor;

/// Everything the controller drives but does not own the implementation of
pub struct Hosts {
    pub window: Box<dyn WindowHost>,
    pub shortcuts: Box<dyn ShortcutHost>,
    pub sleep: Box<dyn DisplaySleepInhibitor>,
    pub surface: Box<dyn SurfaceSink>,
}

/// Host callbacks and surface requests, in the order they happened
#[derive(Debug)]
pub enum ControllerMessage {
    /// The display surface exists and may be armed
    SurfaceReady,
    Invoke {
        request: SurfaceRequest,
        reply: oneshot::Sender<SurfaceResponse>,
    },
    Navigation {
        request: NavigationRequest,
        kind: ResourceKind,
        reply: Option<oneshot::Sender<bool>>,
    },
    Window {
        event: WindowEvent,
        reply: Option<oneshot::Sender<Disposition>>,
    },
    Shortcut(String),
    /// Event raised outside the loop that must reach the surface
    Push(SurfaceEvent),
    Snapshot(oneshot::Sender<ControllerSnapshot>),
    Shutdown,
}

/// Point-in-time view of the controller, for hosts and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub session_state: SessionState,
    pub lockdown: LockdownState,
    pub enforcing: bool,
    pub remaining_ms: Option<u64>,
    pub shortcuts: RegistrationReport,
}

/// Receiving half of the controller channel
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<ControllerMessage>,
    state: watch::Sender<SessionState>,
}

/// Cloneable handle hosts use to talk to a running [`Controller`]
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    state: watch::Receiver<SessionState>,
}

/// Create the channel between hosts and the controller
pub fn channel() -> (ControllerHandle, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);
    (
        ControllerHandle { tx, state: state_rx },
        Inbox { rx, state: state_tx },
    )
}

impl ControllerHandle {
    fn send(&self, message: ControllerMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow::anyhow!("Lockdown controller is not running"))
    }

    pub fn surface_ready(&self) -> Result<()> {
        self.send(ControllerMessage::SurfaceReady)
    }

    /// Execute a validated surface request
    pub async fn invoke(&self, request: SurfaceRequest) -> Result<SurfaceResponse> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerMessage::Invoke { request, reply })?;
        rx.await.context("Controller dropped the request")
    }

    /// Review a navigation and wait for the verdict
    pub async fn navigation(&self, request: NavigationRequest, kind: ResourceKind) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerMessage::Navigation {
            request,
            kind,
            reply: Some(reply),
        })?;
        rx.await.context("Controller dropped the navigation")
    }

    /// Report a window event and wait for whether its default should happen
    pub async fn window_event(&self, event: WindowEvent) -> Result<Disposition> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerMessage::Window {
            event,
            reply: Some(reply),
        })?;
        rx.await.context("Controller dropped the window event")
    }

    /// Report a window event the host has already decided about
    pub fn notify_window(&self, event: WindowEvent) -> Result<()> {
        self.send(ControllerMessage::Window { event, reply: None })
    }

    pub fn shortcut_pressed(&self, key_combo: &str) -> Result<()> {
        self.send(ControllerMessage::Shortcut(key_combo.to_string()))
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerMessage::Snapshot(reply))?;
        rx.await.context("Controller dropped the snapshot request")
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether host-side vetoes should currently apply
    pub fn is_enforcing(&self) -> bool {
        self.session_state() == SessionState::Active
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for(&self, state: SessionState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == state)
            .await
            .context("Controller stopped before reaching the requested state")?;
        Ok(())
    }

    /// Ask the controller to end any session and stop
    pub fn shutdown(&self) {
        let _ = self.send(ControllerMessage::Shutdown);
    }
}

impl SurfaceSink for ControllerHandle {
    fn push(&self, event: SurfaceEvent) {
        if self.send(ControllerMessage::Push(event)).is_err() {
            debug!("Controller is gone, dropping surface event");
        }
    }
}

/// The lockdown aggregate
///
/// Owns the session, the lockdown state and the whitelist. Every mutation
/// happens inside [`Controller::run`], one message or timer at a time.
pub struct Controller {
    timer: SessionTimer,
    enforcer: LockdownEnforcer,
    shortcuts: ShortcutInterceptor,
    filter: NavigationFilter,
    sleep: Box<dyn DisplaySleepInhibitor>,
    surface: Box<dyn SurfaceSink>,
    inbox: mpsc::UnboundedReceiver<ControllerMessage>,
    state_tx: watch::Sender<SessionState>,
    focus_grace: Duration,
    clear_browsing_data: bool,
    registration: RegistrationReport,
    ticker: Option<Interval>,
    refocus_at: Option<Instant>,
}

impl Controller {
    pub fn new(config: &KioskConfig, hosts: Hosts, inbox: Inbox) -> Result<Self> {
        let whitelist = config.whitelist().context("Invalid whitelist")?;

        Ok(Self {
            timer: SessionTimer::new(config.session_duration()),
            enforcer: LockdownEnforcer::new(hosts.window, config.locked_state()),
            shortcuts: ShortcutInterceptor::new(hosts.shortcuts, config.intercepted_shortcuts()),
            filter: NavigationFilter::new(Arc::new(whitelist)),
            sleep: hosts.sleep,
            surface: hosts.surface,
            inbox: inbox.rx,
            state_tx: inbox.state,
            focus_grace: config.focus_grace(),
            clear_browsing_data: config.lockdown.clear_browsing_data,
            registration: RegistrationReport::default(),
            ticker: None,
            refocus_at: None,
        })
    }

    /// Run until shut down or until every handle is dropped
    ///
    /// Any session still active when the loop stops is ended as terminated.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Lockdown controller started ({} whitelist entries, {}s session)",
            self.filter.whitelist().entries().len(),
            self.timer.duration().as_secs()
        );

        loop {
            let expires_at = self
                .timer
                .session()
                .filter(|_| self.timer.is_active())
                .map(|s| s.ends_at());

            tokio::select! {
                biased;

                _ = deadline(expires_at) => self.end_session(EndReason::Expired),
                _ = tick(&mut self.ticker) => self.broadcast_status(),
                _ = deadline(self.refocus_at) => {
                    self.refocus_at = None;
                    self.enforcer.reassert_focus();
                }
                message = self.inbox.recv() => match message {
                    Some(message) => {
                        if self.dispatch(message).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("All controller handles dropped");
                        break;
                    }
                },
            }
        }

        self.end_session(EndReason::Terminated);
        info!("Lockdown controller stopped");
        Ok(())
    }

    fn dispatch(&mut self, message: ControllerMessage) -> ControlFlow<()> {
        match message {
            ControllerMessage::SurfaceReady => self.arm(),
            ControllerMessage::Invoke { request, reply } => {
                let response = self.handle_request(request);
                let _ = reply.send(response);
            }
            ControllerMessage::Navigation {
                request,
                kind,
                reply,
            } => {
                let allowed = match kind {
                    ResourceKind::MainFrame => self.filter.review(&request, self.surface.as_ref()),
                    _ => self.filter.intercept(&request.url, kind, self.surface.as_ref()),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(allowed);
                }
            }
            ControllerMessage::Window { event, reply } => {
                let reaction = self.enforcer.handle(event, self.surface.as_ref());
                if reaction.schedule_refocus {
                    self.refocus_at = Some(Instant::now() + self.focus_grace);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(reaction.disposition);
                }
            }
            ControllerMessage::Shortcut(combo) => {
                self.shortcuts.on_intercepted(&combo, self.surface.as_ref());
            }
            ControllerMessage::Push(event) => self.surface.push(event),
            ControllerMessage::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControllerMessage::Shutdown => {
                info!("Controller shutdown requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_request(&self, request: SurfaceRequest) -> SurfaceResponse {
        debug!("Surface request: {}", request.name());
        match request {
            SurfaceRequest::GetConfig => SurfaceResponse::Config(ConfigView {
                session_duration: u64::try_from(self.timer.duration().as_millis())
                    .unwrap_or(u64::MAX),
                whitelist: self.filter.whitelist().patterns(),
            }),
            SurfaceRequest::ValidateUrl(url) => SurfaceResponse::Allowed(self.filter.evaluate(&url)),
            SurfaceRequest::NavigateTo(url) => {
                SurfaceResponse::Allowed(self.filter.request_navigate(&url, self.surface.as_ref()))
            }
            SurfaceRequest::GetWhitelist => {
                SurfaceResponse::Whitelist(self.filter.whitelist().patterns())
            }
        }
    }

    /// Prepare the surface, lock it down, and start the one session
    fn arm(&mut self) {
        if self.timer.state() != SessionState::Idle {
            debug!("Surface ready again in state {:?}, not re-arming", self.timer.state());
            return;
        }

        if self.clear_browsing_data {
            self.enforcer.prepare_surface();
        }
        self.enforcer.engage();

        let now = Instant::now();
        if self.timer.start(now, Utc::now()).is_none() {
            return;
        }

        let mut ticker = time::interval_at(now, TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        self.registration = self.shortcuts.activate();

        if let Err(e) = self.sleep.inhibit() {
            warn!("Could not keep the display awake: {:#}", e);
        }

        self.state_tx.send_replace(SessionState::Active);
    }

    fn broadcast_status(&mut self) {
        if let Some(status) = self.timer.status(Instant::now()) {
            self.surface.push(SurfaceEvent::SessionTimerUpdate(status));
        }
    }

    /// The single way a session ends; later calls are no-ops
    fn end_session(&mut self, reason: EndReason) {
        let Some(last) = self.timer.end(Instant::now(), reason) else {
            return;
        };

        self.ticker = None;
        self.refocus_at = None;

        if reason == EndReason::Expired {
            self.surface.push(SurfaceEvent::SessionTimerUpdate(last));
        }

        self.enforcer.release();
        self.shortcuts.deactivate();
        if let Err(e) = self.sleep.release() {
            warn!("Failed to release display sleep inhibition: {:#}", e);
        }

        self.surface.push(SurfaceEvent::SessionEnded);
        self.state_tx.send_replace(SessionState::Expired);
        info!("Session ended ({}), lockdown released", reason);
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            session_state: self.timer.state(),
            lockdown: self.enforcer.state(),
            enforcing: self.enforcer.is_enforcing(),
            remaining_ms: self.timer.status(Instant::now()).map(|s| s.remaining),
            shortcuts: self.registration.clone(),
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
