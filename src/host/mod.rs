/// Hosts that embed the lockdown controller
///
/// - `headless`: in-process window and shortcut model
/// - `stdio`: JSON-lines bridge for an external display surface

pub mod headless;
pub mod stdio;

pub use stdio::serve as serve_stdio;
