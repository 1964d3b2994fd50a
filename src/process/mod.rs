//! Process utilities for signalling checkpoint processes by pid
//!
//! The controller inside a rank reaps its own children with `waitpid`. These
//! helpers are for tooling that only has a pid from a trace log and is not the
//! parent of the process behind it.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Check if a process with the given PID is alive
///
/// Sends the null signal, which performs the existence and permission checks
/// without delivering anything. A zombie still counts as alive until its parent
/// collects it.
///
/// # Arguments
/// * `pid` - Process ID, typically a `checkpoint_pid` from a trace log
///
/// # Returns
/// * `true` - The process exists, even if it belongs to another user (`EPERM`)
/// * `false` - No such process (`ESRCH`), or `pid` is zero or negative, which
///   would address a process group rather than a single process
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// SIGKILL `pid`.
///
/// Parked checkpoints block every catchable signal, so SIGKILL is the only
/// signal that ends them. The caller is usually not the parent: the process
/// becomes a zombie until its own parent, or init, collects it.
///
/// # Arguments
/// * `pid` - Process ID of the checkpoint to terminate
///
/// # Returns
/// * `Ok(true)` - The signal was delivered
/// * `Ok(false)` - The process was already gone, or `pid` is not positive
/// * `Err(EPERM)` - The process exists but belongs to another user
pub fn kill_process(pid: i32) -> nix::Result<bool> {
    if pid <= 0 {
        return Ok(false);
    }

    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_current_process_is_alive() {
        let our_pid = std::process::id() as i32;
        assert!(is_process_alive(our_pid));
    }

    #[test]
    fn test_nonexistent_process_is_not_alive() {
        assert!(!is_process_alive(i32::MAX));
    }

    #[test]
    fn test_non_positive_pids_are_never_alive() {
        // 0 and -1 address process groups, not a single process
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(-1));
        assert!(!kill_process(0).unwrap());
        assert!(!kill_process(-1).unwrap());
    }

    #[test]
    fn test_kill_process_terminates_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;

        assert!(kill_process(pid).unwrap());
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!is_process_alive(pid));
    }

    #[test]
    fn test_kill_missing_process_reports_gone() {
        assert!(!kill_process(i32::MAX).unwrap());
    }
}
