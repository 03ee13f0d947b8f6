//! Driving command supervision

mod handle;
mod supervisor;

pub use handle::{ProcessState, RunnerProcessHandle};
pub use supervisor::{ProcessSupervisor, CANCELED_EXIT_CODE, LAUNCH_FAILED_EXIT_CODE};

/// Whether `pid` names a live (non-zombie) process
#[cfg(all(test, unix))]
pub(crate) fn process_running(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence.
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    // Orphans linger as zombies until init reaps them.
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .map_or(true, |(_, rest)| !rest.starts_with('Z')),
        Err(_) => true,
    }
}
