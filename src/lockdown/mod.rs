/// Lockdown enforcement engine
///
/// This module provides:
/// - The session state machine with its hard time boundary
/// - Window lockdown that re-asserts the restricted presentation
/// - Best-effort interception of OS-level shortcuts
/// - The controller aggregate that drives all of them from one event loop

pub mod controller;
pub mod enforcement;
pub mod session;
pub mod shortcuts;
