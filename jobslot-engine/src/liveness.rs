//! Process liveness probing
//!
//! A job that was started records the pid of the process running it. Before
//! launching anything new the queue probes that pid to find out whether the
//! job is genuinely still running or was orphaned by a crash.

use tracing::{debug, warn};

/// Decides whether a recorded process id still refers to a live process
pub trait LivenessChecker: Send + Sync {
    /// Returns true only on an unambiguous existence signal
    ///
    /// A zero pid, a missing process, or a probe the caller is not allowed
    /// to send all count as not alive.
    fn is_alive(&self, process_id: u32) -> bool;
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Alive,
    Dead,
    /// The process may exist but could not be probed (e.g. EPERM)
    Indeterminate,
}

/// Probes processes on the local host with signal 0
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLivenessChecker;

impl ProcessLivenessChecker {
    pub fn new() -> Self {
        Self
    }

    #[cfg(unix)]
    pub fn probe(&self, process_id: u32) -> Probe {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // 0 and negative values address process groups, never probe them
        let raw = match i32::try_from(process_id) {
            Ok(raw) if raw > 0 => raw,
            _ => return Probe::Dead,
        };

        match kill(Pid::from_raw(raw), None) {
            Ok(()) => Probe::Alive,
            Err(Errno::ESRCH) => Probe::Dead,
            Err(Errno::EPERM) => Probe::Indeterminate,
            Err(errno) => {
                warn!(pid = process_id, %errno, "Unexpected liveness probe failure");
                Probe::Indeterminate
            }
        }
    }

    #[cfg(not(unix))]
    pub fn probe(&self, _process_id: u32) -> Probe {
        Probe::Indeterminate
    }
}

impl LivenessChecker for ProcessLivenessChecker {
    fn is_alive(&self, process_id: u32) -> bool {
        match self.probe(process_id) {
            Probe::Alive => true,
            Probe::Dead => {
                debug!(pid = process_id, "Process is gone");
                false
            }
            Probe::Indeterminate => {
                warn!(
                    pid = process_id,
                    "Cannot probe process, treating it as gone so its job can be recovered"
                );
                false
            }
        }
    }
}

/// Liveness answers fixed by the test itself
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct StaticLiveness {
    alive: std::sync::Mutex<std::collections::HashSet<u32>>,
}

#[cfg(test)]
impl StaticLiveness {
    pub(crate) fn set_alive(&self, process_id: u32) {
        self.alive.lock().unwrap().insert(process_id);
    }

    pub(crate) fn set_dead(&self, process_id: u32) {
        self.alive.lock().unwrap().remove(&process_id);
    }
}

#[cfg(test)]
impl LivenessChecker for StaticLiveness {
    fn is_alive(&self, process_id: u32) -> bool {
        process_id != 0 && self.alive.lock().unwrap().contains(&process_id)
    }
}
