use anyhow::{Context, Result};
use std::process::{Child, Command, Stdio};

/// Keep the display and system awake until the child is stopped or we exit
pub fn start_inhibit() -> Result<Child> {
    Command::new("caffeinate")
        .arg("-di")
        .arg("-w")
        .arg(std::process::id().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to start caffeinate")
}
