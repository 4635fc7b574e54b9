//! PID liveness probe and signal delivery.
//!
//! The liveness sweep and `agent.kill` both operate on raw PIDs, never on
//! wait handles — the reaper owns those.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("invalid PID: {pid}")]
    InvalidPid { pid: u32 },

    #[error("access denied signalling PID {pid}")]
    AccessDenied { pid: u32 },

    #[error("failed to signal PID {pid}: {message}")]
    SignalFailed { pid: u32, message: String },
}

/// Outcome of a SIGTERM delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOutcome {
    Delivered,
    /// ESRCH: the process was gone before the signal.
    AlreadyExited,
}

/// No-op signal probe: does a process with this PID still exist?
///
/// EPERM counts as alive — the process exists, we just can't signal it.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Deliver SIGTERM to a process.
///
/// ESRCH maps to [`TermOutcome::AlreadyExited`]; EPERM bubbles as
/// [`ProcessError::AccessDenied`].
pub fn send_sigterm(pid: u32) -> Result<TermOutcome, ProcessError> {
    if pid == 0 {
        return Err(ProcessError::InvalidPid { pid });
    }
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(TermOutcome::Delivered),
        Err(Errno::ESRCH) => Ok(TermOutcome::AlreadyExited),
        Err(Errno::EPERM) => Err(ProcessError::AccessDenied { pid }),
        Err(e) => Err(ProcessError::SignalFailed {
            pid,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_alive_self() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn test_pid_alive_zero_is_false() {
        assert!(!pid_alive(0));
    }

    #[test]
    fn test_pid_alive_unlikely_pid_is_false() {
        // PID close to the default pid_max; extremely unlikely to be live in CI
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn test_send_sigterm_to_gone_pid_is_already_exited() {
        let outcome = send_sigterm(4_000_000).unwrap();
        assert_eq!(outcome, TermOutcome::AlreadyExited);
    }

    #[test]
    fn test_send_sigterm_zero_pid_rejected() {
        assert!(matches!(
            send_sigterm(0),
            Err(ProcessError::InvalidPid { pid: 0 })
        ));
    }

    #[test]
    fn test_send_sigterm_delivers_to_real_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();
        assert_eq!(send_sigterm(pid).unwrap(), TermOutcome::Delivered);
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
