//! States of the supervision loop and the exit-code policy.

use std::fmt;
use std::time::Duration;

/// Why the running child is being shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A watched file got a newer mtime.
    CodeChange,
    /// The supervisor itself was asked to terminate.
    SupervisorExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Starting,
    Running,
    ShuttingDown(ShutdownReason),
    Backoff(Duration),
    /// Terminal.
    Exiting,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Exiting)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => f.write_str("idle"),
            State::Starting => f.write_str("starting"),
            State::Running => f.write_str("running"),
            State::ShuttingDown(ShutdownReason::CodeChange) => {
                f.write_str("shutting-down(code-change)")
            }
            State::ShuttingDown(ShutdownReason::SupervisorExit) => {
                f.write_str("shutting-down(supervisor-exit)")
            }
            State::Backoff(d) => write!(f, "backoff({:.1}s)", d.as_secs_f64()),
            State::Exiting => f.write_str("exiting"),
        }
    }
}

/// What a natural exit of the child means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The child asked to be restarted: no backoff.
    RestartRequested,
    /// Exit 0: wait the long, normal-exit backoff.
    Clean,
    /// Anything else, including death by signal.
    Crashed(i32),
}

pub fn classify_exit(code: i32, restart_sentinel: i32) -> ExitKind {
    // Checked first so a sentinel of 0 still means "restart now".
    if code == restart_sentinel {
        ExitKind::RestartRequested
    } else if code == 0 {
        ExitKind::Clean
    } else {
        ExitKind::Crashed(code)
    }
}

/// State following a natural exit, given both backoff durations.
pub fn after_exit(kind: ExitKind, crash_backoff: Duration, normal_backoff: Duration) -> State {
    match kind {
        ExitKind::RestartRequested => State::Starting,
        ExitKind::Clean => State::Backoff(normal_backoff),
        ExitKind::Crashed(_) => State::Backoff(crash_backoff),
    }
}
