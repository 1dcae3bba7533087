use anyhow::Result;
use windows_sys::Win32::System::Power::{
    ES_CONTINUOUS, ES_DISPLAY_REQUIRED, ES_SYSTEM_REQUIRED, SetThreadExecutionState,
};

/// Marker that the execution state of the controller thread is raised
#[derive(Debug)]
pub struct ExecutionStateGuard;

/// Ask Windows to keep the display on while this thread runs
///
/// The execution state is per thread, so the controller must stay on the
/// thread that called this until the session ends.
pub fn start_inhibit() -> Result<ExecutionStateGuard> {
    let previous =
        unsafe { SetThreadExecutionState(ES_CONTINUOUS | ES_DISPLAY_REQUIRED | ES_SYSTEM_REQUIRED) };
    if previous == 0 {
        anyhow::bail!("SetThreadExecutionState refused to keep the display on");
    }
    Ok(ExecutionStateGuard)
}

pub fn stop_inhibit(_guard: ExecutionStateGuard) -> Result<()> {
    let previous = unsafe { SetThreadExecutionState(ES_CONTINUOUS) };
    if previous == 0 {
        anyhow::bail!("SetThreadExecutionState refused to restore the execution state");
    }
    Ok(())
}
