//! JSON-lines bridge for an external display surface
//!
//! Inbound, one object per line:
//! - `{"id": 1, "channel": "validate-url", "payload": "https://..."}`: a surface request
//! - `{"host": "ready"}`: the surface is up, arm the session
//! - `{"host": "window", "event": "close-attempted"}`: a window-manager event
//! - `{"host": "shortcut", "combo": "F5"}`: an intercepted key press
//! - `{"host": "navigation", "id": 2, "url": "...", "origin": "pre-navigation-hook"}`
//! - `{"host": "permission", "id": 3, "permission": "media", "origin": "https://..."}`
//! - `{"host": "snapshot"}`
//!
//! Outbound lines are responses (`{"id", "result"}` or `{"id", "error"}`),
//! pushed events (`{"event", "payload"}`), window commands the renderer must
//! apply (`{"window": {"command", "value"}}`), and answers to host messages.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::headless::{HeadlessShortcuts, HeadlessWindow, VirtualDisplay, WindowCommand};
use crate::channel::{SurfaceEvent, SurfaceRequest, SurfaceResponse};
use crate::config::KioskConfig;
use crate::lockdown::controller::{self, Controller, ControllerHandle, ControllerSnapshot, Hosts};
use crate::lockdown::enforcement::{Disposition, WindowEvent};
use crate::navigation::{self, NavigationOrigin, NavigationRequest, ResourceKind};
use crate::platform::DisplaySleepInhibitor;

/// Message from the host side of the bridge
#[derive(Debug, Deserialize)]
#[serde(tag = "host", rename_all = "kebab-case")]
enum HostMessage {
    Ready,
    Window {
        event: WindowEvent,
    },
    Shortcut {
        combo: String,
    },
    Navigation {
        #[serde(default)]
        id: Value,
        url: String,
        #[serde(default = "default_origin")]
        origin: NavigationOrigin,
        #[serde(default)]
        resource: ResourceKind,
    },
    Permission {
        #[serde(default)]
        id: Value,
        permission: String,
        #[serde(default)]
        origin: Option<String>,
    },
    Snapshot,
}

fn default_origin() -> NavigationOrigin {
    NavigationOrigin::PreNavigationHook
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Outbound<'a> {
    Response {
        id: Value,
        result: SurfaceResponse,
    },
    Error {
        id: Value,
        error: String,
    },
    Event(&'a SurfaceEvent),
    Window {
        window: WindowCommand,
    },
    Disposition {
        #[serde(rename = "windowEvent")]
        event: WindowEvent,
        disposition: Disposition,
    },
    Navigation {
        id: Value,
        allowed: bool,
    },
    Permission {
        id: Value,
        permission: String,
        granted: bool,
    },
    Snapshot {
        snapshot: ControllerSnapshot,
    },
}

/// What the bridge should do after an inbound line
enum Flow {
    Continue,
    Exit,
}

/// Run a lockdown session against a surface speaking JSON lines
///
/// Returns when the input closes or when an exit request is allowed.
pub async fn serve<R, W>(
    config: &KioskConfig,
    sleep: Box<dyn DisplaySleepInhibitor>,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (outlet_tx, mut outlet_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let window = HeadlessWindow::with_outlet(outlet_tx);
    let display = window.display();

    let (handle, inbox) = controller::channel();
    let hosts = Hosts {
        window: Box::new(window),
        shortcuts: Box::new(HeadlessShortcuts::new()),
        sleep,
        surface: Box::new(event_tx),
    };
    let controller = Controller::new(config, hosts, inbox)?;
    let task = tokio::spawn(controller.run());

    let mut lines = input.lines();
    info!("Stdio bridge ready");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from surface")? else {
                    debug!("Surface closed its input");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let flow = handle_line(line, &handle, &display, &mut output).await?;
                if let Flow::Exit = flow {
                    break;
                }
            }
            Some(event) = event_rx.recv() => {
                write_line(&mut output, &Outbound::Event(&event)).await?;
            }
            Some(command) = outlet_rx.recv() => {
                write_line(&mut output, &Outbound::Window { window: command }).await?;
            }
        }
    }

    handle.shutdown();
    task.await.context("Controller task panicked")??;

    while let Ok(command) = outlet_rx.try_recv() {
        write_line(&mut output, &Outbound::Window { window: command }).await?;
    }
    while let Ok(event) = event_rx.try_recv() {
        write_line(&mut output, &Outbound::Event(&event)).await?;
    }

    info!("Stdio bridge stopped");
    Ok(())
}

async fn handle_line<W: AsyncWrite + Unpin>(
    line: &str,
    handle: &ControllerHandle,
    display: &Arc<Mutex<VirtualDisplay>>,
    output: &mut W,
) -> Result<Flow> {
    let mut value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping malformed line from surface: {}", e);
            let error = format!("Malformed JSON: {}", e);
            write_line(output, &Outbound::Error { id: Value::Null, error }).await?;
            return Ok(Flow::Continue);
        }
    };

    if value.get("host").is_some() {
        return handle_host(value, handle, display, output).await;
    }

    let id = value
        .as_object_mut()
        .and_then(|object| object.remove("id"))
        .unwrap_or(Value::Null);

    let outbound = match SurfaceRequest::from_json(value) {
        Ok(request) => match handle.invoke(request).await {
            Ok(result) => Outbound::Response { id, result },
            Err(e) => Outbound::Error {
                id,
                error: format!("{:#}", e),
            },
        },
        Err(e) => {
            warn!("Rejected surface request: {:#}", e);
            Outbound::Error {
                id,
                error: format!("{:#}", e),
            }
        }
    };
    write_line(output, &outbound).await?;
    Ok(Flow::Continue)
}

async fn handle_host<W: AsyncWrite + Unpin>(
    value: Value,
    handle: &ControllerHandle,
    display: &Arc<Mutex<VirtualDisplay>>,
    output: &mut W,
) -> Result<Flow> {
    let message: HostMessage = match serde_json::from_value(value) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping unknown host message: {}", e);
            let error = format!("Unknown host message: {}", e);
            write_line(output, &Outbound::Error { id: Value::Null, error }).await?;
            return Ok(Flow::Continue);
        }
    };

    match message {
        HostMessage::Ready => handle.surface_ready()?,
        HostMessage::Window { event } => {
            {
                let mut display = display.lock().unwrap_or_else(|e| e.into_inner());
                match event {
                    WindowEvent::FocusLost => display.focused = false,
                    WindowEvent::FocusGained => display.focused = true,
                    _ => {}
                }
            }

            let disposition = handle.window_event(event).await?;
            write_line(output, &Outbound::Disposition { event, disposition }).await?;

            if event == WindowEvent::ExitRequested && disposition == Disposition::Allow {
                info!("Exit allowed, stopping bridge");
                return Ok(Flow::Exit);
            }
        }
        HostMessage::Shortcut { combo } => handle.shortcut_pressed(&combo)?,
        HostMessage::Navigation {
            id,
            url,
            origin,
            resource,
        } => {
            let allowed = handle
                .navigation(NavigationRequest::new(url, origin), resource)
                .await?;
            write_line(output, &Outbound::Navigation { id, allowed }).await?;
        }
        HostMessage::Permission {
            id,
            permission,
            origin,
        } => {
            let granted = navigation::review_permission(&permission, origin.as_deref());
            write_line(
                output,
                &Outbound::Permission {
                    id,
                    permission,
                    granted,
                },
            )
            .await?;
        }
        HostMessage::Snapshot => {
            let snapshot = handle.snapshot().await?;
            write_line(output, &Outbound::Snapshot { snapshot }).await?;
        }
    }

    Ok(Flow::Continue)
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, message: &Outbound<'_>) -> Result<()> {
    let mut line = serde_json::to_vec(message).context("Failed to encode outbound message")?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .context("Failed to write to surface")?;
    output.flush().await.context("Failed to flush surface output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NoSleepInhibitor;
    use serde_json::json;

    async fn run_script(config: KioskConfig, script: &[Value]) -> Vec<Value> {
        let input: String = script.iter().map(|v| format!("{}\n", v)).collect();
        let mut output = Vec::new();

        serve(&config, Box::new(NoSleepInhibitor), input.as_bytes(), &mut output)
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn make_test_config() -> KioskConfig {
        let mut config = KioskConfig::default();
        config.whitelist = vec![
            "https://www.khanacademy.org".into(),
            "https://*.khanacademy.org".into(),
        ];
        config
    }

    #[tokio::test(start_paused = true)]
    async fn answers_requests_by_id() {
        let out = run_script(
            make_test_config(),
            &[
                json!({"id": 1, "channel": "validate-url", "payload": "https://www.khanacademy.org/math"}),
                json!({"id": 2, "channel": "validate-url", "payload": "http://www.khanacademy.org"}),
                json!({"id": 3, "channel": "get-config"}),
            ],
        )
        .await;

        assert!(out.contains(&json!({"id": 1, "result": true})));
        assert!(out.contains(&json!({"id": 2, "result": false})));
        assert!(out.contains(&json!({
            "id": 3,
            "result": {
                "sessionDuration": 600000,
                "whitelist": ["https://www.khanacademy.org", "https://*.khanacademy.org"]
            }
        })));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_channel_misuse_without_executing() {
        let out = run_script(
            make_test_config(),
            &[
                json!({"id": 7, "channel": "end-session"}),
                json!({"id": 8, "channel": "navigate-to"}),
                json!({"id": 9, "channel": "get-config", "extra": true}),
            ],
        )
        .await;

        for id in [7, 8, 9] {
            let line = out.iter().find(|v| v["id"] == json!(id)).unwrap();
            assert!(line.get("error").is_some(), "{line}");
        }
        assert!(!out.iter().any(|v| v["event"] == json!("navigation-blocked")));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_mirrors_lockdown_to_renderer() {
        let out = run_script(
            make_test_config(),
            &[
                json!({"host": "ready"}),
                json!({"host": "window", "event": "close-attempted"}),
            ],
        )
        .await;

        assert!(out.contains(&json!({"window": {"command": "clear-browsing-data"}})));
        assert!(out.contains(&json!({"window": {"command": "set-fullscreen", "value": true}})));
        assert!(out.contains(&json!({"windowEvent": "close-attempted", "disposition": "veto"})));
        assert!(out.contains(&json!({"event": "close-attempted"})));

        // Input closing ends the session and releases the window
        assert!(out.contains(&json!({"event": "session-ended"})));
        assert!(out.contains(&json!({"window": {"command": "set-closable", "value": true}})));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_navigation_is_reported() {
        let out = run_script(
            make_test_config(),
            &[json!({"host": "navigation", "id": "n1", "url": "https://example.com"})],
        )
        .await;

        assert!(out.contains(&json!({"id": "n1", "allowed": false})));
        assert!(out.contains(&json!({"event": "navigation-blocked", "payload": "https://example.com"})));
    }

    #[tokio::test(start_paused = true)]
    async fn permission_requests_are_denied() {
        let out = run_script(
            make_test_config(),
            &[
                json!({"host": "ready"}),
                json!({
                    "host": "permission",
                    "id": 3,
                    "permission": "media",
                    "origin": "https://www.khanacademy.org"
                }),
                json!({"host": "permission", "id": 4, "permission": "notifications"}),
            ],
        )
        .await;

        assert!(out.contains(&json!({"id": 3, "permission": "media", "granted": false})));
        assert!(out.contains(&json!({"id": 4, "permission": "notifications", "granted": false})));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_before_session_stops_the_bridge() {
        let out = run_script(
            make_test_config(),
            &[
                json!({"host": "window", "event": "exit-requested"}),
                json!({"id": 1, "channel": "get-whitelist"}),
            ],
        )
        .await;

        assert!(out.contains(&json!({"windowEvent": "exit-requested", "disposition": "allow"})));
        assert!(!out.iter().any(|v| v["id"] == json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_lines_are_answered_not_fatal() {
        let input = "not json\n{\"host\": \"teleport\"}\n{\"id\": 1, \"channel\": \"get-whitelist\"}\n";
        let mut output = Vec::new();
        serve(&make_test_config(), Box::new(NoSleepInhibitor), input.as_bytes(), &mut output)
            .await
            .unwrap();

        let out: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(out.iter().filter(|v| v.get("error").is_some()).count(), 2);
        assert!(out.iter().any(|v| v["id"] == json!(1) && v["result"].is_array()));
    }
}
