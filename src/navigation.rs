use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::channel::{SurfaceEvent, SurfaceSink};
use crate::whitelist::Whitelist;

/// Where a navigation attempt was intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationOrigin {
    /// The webview is about to load a URL
    PreNavigationHook,
    /// The surface asked the controller to navigate
    ExplicitCommand,
    /// The page tried to open a new window or tab
    NewSurfaceRequest,
}

/// What kind of load the pre-navigation hook saw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    #[default]
    MainFrame,
    SubFrame,
    SubResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NavigationRequest {
    pub url: String,
    pub origin: NavigationOrigin,
}

impl NavigationRequest {
    pub fn new(url: impl Into<String>, origin: NavigationOrigin) -> Self {
        Self {
            url: url.into(),
            origin,
        }
    }
}

/// Applies the whitelist at every navigation interception point
#[derive(Debug, Clone)]
pub struct NavigationFilter {
    whitelist: Arc<Whitelist>,
}

impl NavigationFilter {
    pub fn new(whitelist: Arc<Whitelist>) -> Self {
        Self { whitelist }
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Side-effect-free check
    pub fn evaluate(&self, url: &str) -> bool {
        self.whitelist.is_allowed(url)
    }

    /// Evaluate an explicit navigation command, telling the surface on denial
    pub fn request_navigate(&self, url: &str, surface: &dyn SurfaceSink) -> bool {
        if self.evaluate(url) {
            debug!("Navigation approved: {}", url);
            return true;
        }

        info!("Blocked navigation to: {}", url);
        surface.push(SurfaceEvent::NavigationBlocked(url.to_string()));
        false
    }

    /// Route a navigation request by where it was intercepted
    ///
    /// New-surface requests are never opened; the surface is told about them
    /// and decides for itself whether to navigate in place.
    pub fn review(&self, request: &NavigationRequest, surface: &dyn SurfaceSink) -> bool {
        match request.origin {
            NavigationOrigin::PreNavigationHook | NavigationOrigin::ExplicitCommand => {
                self.request_navigate(&request.url, surface)
            }
            NavigationOrigin::NewSurfaceRequest => {
                info!("Blocked new window request: {}", request.url);
                surface.push(SurfaceEvent::NewWindowRequest(request.url.clone()));
                false
            }
        }
    }

    /// Pre-navigation hook for everything the webview loads
    ///
    /// Only top-level loads are policed; resources of an already-loaded page
    /// pass through untouched.
    pub fn intercept(&self, url: &str, kind: ResourceKind, surface: &dyn SurfaceSink) -> bool {
        match kind {
            ResourceKind::MainFrame => self.review(
                &NavigationRequest::new(url, NavigationOrigin::PreNavigationHook),
                surface,
            ),
            ResourceKind::SubFrame | ResourceKind::SubResource => true,
        }
    }
}

/// Decide a page's request for a device or browser capability
///
/// Camera, microphone, geolocation, notifications and the rest are never
/// granted to the surface, whatever page asks.
pub fn review_permission(permission: &str, origin: Option<&str>) -> bool {
    info!(
        "Denied {} permission request from {}",
        permission,
        origin.unwrap_or("unknown origin")
    );
    false
}
