//! Read-only status of a supervised instance, derived from its PID file.

use std::fmt;

use crate::error::Result;
use crate::lifecycle::is_alive;
use crate::pidfile::PidFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running { pid: i32 },
    /// The file names a process that no longer exists.
    Stale { pid: i32 },
    Stopped,
}

impl Status {
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running { .. })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running { pid } => write!(f, "running (pid {pid})"),
            Status::Stale { pid } => write!(f, "stopped (stale pid file names {pid})"),
            Status::Stopped => f.write_str("stopped"),
        }
    }
}

/// Check whether the process named by `pid_file` is alive.
pub fn check_status(pid_file: &PidFile) -> Result<Status> {
    Ok(match pid_file.read()? {
        Some(pid) if is_alive(pid) => Status::Running { pid },
        Some(pid) => Status::Stale { pid },
        None => Status::Stopped,
    })
}
