//! Process existence checking.

use fleet_common::{ProcessError, ProcessResult};

/// Check if a process with the given PID exists.
///
/// On Unix this is `kill(pid, 0)`: no signal is delivered. A process we are
/// not allowed to signal still counts as existing.
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(Errno::EPERM) => Ok(true),
            Err(e) => Err(ProcessError::CheckFailed {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    {
        Err(ProcessError::CheckFailed {
            pid,
            reason: "liveness checks are only supported on Unix".to_string(),
        })
    }
}
