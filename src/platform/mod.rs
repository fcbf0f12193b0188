//! Platform-specific process control for hypervisor processes

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// Outcome of signalling a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signalled {
    /// The signal was delivered
    Delivered,
    /// No such process; it already exited
    AlreadyGone,
}

/// Terminate a process gracefully (SIGTERM)
#[cfg(unix)]
pub fn terminate_process(pid: u32) -> std::io::Result<Signalled> {
    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result == 0 {
        return Ok(Signalled::Delivered);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(Signalled::AlreadyGone)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
pub fn terminate_process(pid: u32) -> std::io::Result<Signalled> {
    let _ = pid;
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process signals are only supported on unix",
    ))
}

/// Check if a process exists and has not exited.
///
/// A zombie counts as exited: the hypervisor is gone even if nobody reaped it.
pub fn is_process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new(),
    );
    system
        .process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}
