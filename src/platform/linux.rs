use anyhow::{Context, Result};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

/// Hold a systemd-logind idle/sleep inhibitor for as long as the child lives
pub fn start_inhibit() -> Result<Child> {
    let mut command = Command::new("systemd-inhibit");
    command
        .args([
            "--what=idle:sleep",
            "--who=lockdown-browser",
            "--why=Kiosk session active",
            "--mode=block",
            "sleep",
            "infinity",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Take the inhibitor down with us if the controller dies
    unsafe {
        command.pre_exec(|| {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }

    command
        .spawn()
        .context("Failed to start systemd-inhibit (is systemd-logind available?)")
}
