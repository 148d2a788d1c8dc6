//! Platform-specific process primitives.
//!
//! Liveness checks and forceful termination by PID, used for servers the
//! supervisor did not spawn itself (re-attached via a verified PID file).

#![allow(unsafe_code)]

use crate::error::{Result, SupervisorError};
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`; `EPERM` still means the process exists
/// - **Windows**: `OpenProcess` + `GetExitCodeProcess` (`STILL_ACTIVE`)
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        // SAFETY: OpenProcess has no memory-safety preconditions; the handle is
        // checked for null and closed exactly once below.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut code);
            CloseHandle(handle);
            ok != 0 && code == STILL_ACTIVE as u32
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        false
    }
}

/// Forcefully terminate a process.
///
/// # Platform Behavior
/// - **Linux/macOS**: `SIGKILL`, then a non-blocking reap in case it is our child
/// - **Windows**: `TerminateProcess` with exit code 1
///
/// A process that is already gone counts as success.
pub fn force_kill(pid: u32) -> Result<()> {
    if !is_process_alive(pid) {
        debug!("Process {} is not running", pid);
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::sys::wait::{waitpid, WaitPidFlag};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| SupervisorError::ProcessNotFound { pid })?;
        let nix_pid = Pid::from_raw(raw);

        debug!("Sending SIGKILL to process {}", pid);
        match kill(nix_pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(Errno::EPERM) => return Err(SupervisorError::PermissionDenied { pid }),
            Err(e) => {
                return Err(SupervisorError::Io {
                    message: format!("Failed to kill process {}: {}", pid, e),
                    path: None,
                    source: None,
                })
            }
        }

        // ECHILD means we're not the parent - init will reap it
        if let Err(e) = waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
            if e != Errno::ECHILD {
                debug!("waitpid({}) failed: {}", pid, e);
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

        // SAFETY: the handle is checked for null before use and closed exactly once.
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                return Err(SupervisorError::PermissionDenied { pid });
            }
            let ok = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if ok == 0 {
                let err = std::io::Error::last_os_error();
                tracing::warn!("TerminateProcess failed for {}: {}", pid, err);
                return Err(SupervisorError::Io {
                    message: format!("Failed to terminate process {}", pid),
                    path: None,
                    source: Some(err),
                });
            }
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(SupervisorError::SystemCapabilityUnavailable {
            capability: "process termination".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(4_000_000_000));
    }

    #[test]
    fn test_force_kill_nonexistent() {
        assert!(force_kill(4_000_000_000).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_force_kill_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        force_kill(pid).unwrap();
        // force_kill may already have reaped it
        let _ = child.wait();

        assert!(!is_process_alive(pid));
    }
}
