//! Error taxonomy for the supervision core.
//!
//! None of these abort the supervisor: the loop handles each one locally,
//! logs it, and keeps retrying the managed process.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The managed command could not be launched.
    #[error("failed to spawn {command:?}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A foreign process kept the port bound even after SIGKILL.
    #[error("port {port} still bound after forced kill (pids: {pids:?})")]
    PortBusy { port: u16, pids: Vec<i32> },

    /// Graceful termination exceeded the grace period; recovered by SIGKILL.
    #[error("pid {pid} ignored graceful termination for {grace:?}")]
    ShutdownTimedOut { pid: i32, grace: Duration },

    /// The change-detection walk could not read its root.
    #[error("cannot walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
