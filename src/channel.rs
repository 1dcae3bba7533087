//! Message contract between the controller and the display surface
//!
//! The display surface is untrusted: it may only send the four requests in
//! [`SurfaceRequest`], and it only ever receives the events in [`SurfaceEvent`].
//! Anything else is rejected before it reaches the controller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Request sent by the display surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceRequest {
    GetConfig,
    ValidateUrl(String),
    NavigateTo(String),
    GetWhitelist,
}

/// Wire form of a request before validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequest {
    channel: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl SurfaceRequest {
    /// Channel name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceRequest::GetConfig => "get-config",
            SurfaceRequest::ValidateUrl(_) => "validate-url",
            SurfaceRequest::NavigateTo(_) => "navigate-to",
            SurfaceRequest::GetWhitelist => "get-whitelist",
        }
    }

    /// Parse and validate a request from its JSON form
    ///
    /// `{"channel": "validate-url", "payload": "https://..."}`
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let raw: RawRequest =
            serde_json::from_value(value).context("Malformed channel request")?;
        Self::from_parts(&raw.channel, raw.payload)
    }

    /// Validate a channel name and payload against the fixed vocabulary
    pub fn from_parts(channel: &str, payload: Option<serde_json::Value>) -> Result<Self> {
        match channel {
            "get-config" => {
                expect_no_payload(channel, payload)?;
                Ok(SurfaceRequest::GetConfig)
            }
            "get-whitelist" => {
                expect_no_payload(channel, payload)?;
                Ok(SurfaceRequest::GetWhitelist)
            }
            "validate-url" => Ok(SurfaceRequest::ValidateUrl(expect_url(channel, payload)?)),
            "navigate-to" => Ok(SurfaceRequest::NavigateTo(expect_url(channel, payload)?)),
            other => anyhow::bail!("Unknown channel '{}'", other),
        }
    }
}

fn expect_no_payload(channel: &str, payload: Option<serde_json::Value>) -> Result<()> {
    match payload {
        None | Some(serde_json::Value::Null) => Ok(()),
        Some(_) => anyhow::bail!("Channel '{}' does not take a payload", channel),
    }
}

fn expect_url(channel: &str, payload: Option<serde_json::Value>) -> Result<String> {
    match payload {
        Some(serde_json::Value::String(url)) => Ok(url),
        Some(_) => anyhow::bail!("Channel '{}' expects a URL string payload", channel),
        None => anyhow::bail!("Channel '{}' requires a URL payload", channel),
    }
}

/// Configuration exposed to the surface through `get-config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub session_duration: u64,
    pub whitelist: Vec<String>,
}

/// Controller answer to a [`SurfaceRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SurfaceResponse {
    Config(ConfigView),
    Allowed(bool),
    Whitelist(Vec<String>),
}

/// Status broadcast while a session is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    /// Session length in milliseconds
    pub duration: u64,
    /// Unix epoch milliseconds
    pub start_time: i64,
    /// Unix epoch milliseconds
    pub end_time: i64,
    /// Milliseconds left, never negative
    pub remaining: u64,
}

/// Event pushed from the controller to the surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SurfaceEvent {
    SessionTimerUpdate(TimerUpdate),
    SessionEnded,
    NavigationBlocked(String),
    CloseAttempted,
    ShortcutBlocked(String),
    AdminExitRequest,
    NewWindowRequest(String),
}

impl SurfaceEvent {
    /// Event name as the surface subscribes to it
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceEvent::SessionTimerUpdate(_) => "session-timer-update",
            SurfaceEvent::SessionEnded => "session-ended",
            SurfaceEvent::NavigationBlocked(_) => "navigation-blocked",
            SurfaceEvent::CloseAttempted => "close-attempted",
            SurfaceEvent::ShortcutBlocked(_) => "shortcut-blocked",
            SurfaceEvent::AdminExitRequest => "admin-exit-request",
            SurfaceEvent::NewWindowRequest(_) => "new-window-request",
        }
    }

    /// Event payload alone, `null` for events without one
    pub fn payload(&self) -> serde_json::Value {
        match self {
            SurfaceEvent::SessionTimerUpdate(update) => {
                serde_json::to_value(update).unwrap_or(serde_json::Value::Null)
            }
            SurfaceEvent::NavigationBlocked(url) | SurfaceEvent::NewWindowRequest(url) => {
                serde_json::Value::String(url.clone())
            }
            SurfaceEvent::ShortcutBlocked(combo) => serde_json::Value::String(combo.clone()),
            SurfaceEvent::SessionEnded
            | SurfaceEvent::CloseAttempted
            | SurfaceEvent::AdminExitRequest => serde_json::Value::Null,
        }
    }
}

/// Fire-and-forget delivery of events to the display surface
///
/// Delivery never blocks and never fails outward; a surface that has gone away
/// simply stops receiving.
pub trait SurfaceSink: Send {
    fn push(&self, event: SurfaceEvent);
}

impl SurfaceSink for mpsc::UnboundedSender<SurfaceEvent> {
    fn push(&self, event: SurfaceEvent) {
        if let Err(e) = self.send(event) {
            tracing::debug!("Display surface is gone, dropping {}", e.0.name());
        }
    }
}
