//! Clearing foreign listeners off the managed process's TCP port.
//!
//! Occupants come from the OS socket table via the `listeners` crate. When
//! discovery itself fails the port is assumed free and the child's own bind
//! attempt is left to fail loudly.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{Result, SupervisorError};

/// Graceful-phase polling: attempts × interval.
const TERM_POLLS: u32 = 5;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PortGuardian {
    term_polls: u32,
    poll_interval: Duration,
}

impl Default for PortGuardian {
    fn default() -> Self {
        Self::new()
    }
}

impl PortGuardian {
    pub fn new() -> Self {
        Self {
            term_polls: TERM_POLLS,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Shorten the graceful wait (tests and impatient callers).
    pub fn with_polling(mut self, polls: u32, interval: Duration) -> Self {
        self.term_polls = polls;
        self.poll_interval = interval;
        self
    }

    /// PIDs listening on `port`, excluding ourselves.
    ///
    /// A failed socket-table lookup yields an empty list.
    pub fn occupants(&self, port: u16) -> Vec<i32> {
        match listeners::get_all() {
            Ok(all) => occupant_pids(
                all.into_iter()
                    .filter(|listener| listener.socket.port() == port)
                    .map(|listener| listener.process.pid),
            ),
            Err(e) => {
                log::warn!("cannot read socket table for port {port}: {e}");
                vec![]
            }
        }
    }

    /// Make sure nothing listens on `port` before the child is spawned.
    ///
    /// Port 0 disables the check.
    pub fn ensure_port_free(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Ok(());
        }
        let pids = self.occupants(port);
        if pids.is_empty() {
            log::debug!("port {port} is free");
            return Ok(());
        }

        log::warn!("port {port} held by pids {pids:?}, sending SIGTERM");
        send_all(&pids, Signal::SIGTERM);

        for _ in 0..self.term_polls {
            std::thread::sleep(self.poll_interval);
            if self.occupants(port).is_empty() {
                log::info!("port {port} released after SIGTERM");
                return Ok(());
            }
        }

        let survivors = self.occupants(port);
        if survivors.is_empty() {
            return Ok(());
        }
        log::warn!("port {port} still held by {survivors:?}, escalating to SIGKILL");
        send_all(&survivors, Signal::SIGKILL);
        std::thread::sleep(self.poll_interval);

        let remaining = self.occupants(port);
        if remaining.is_empty() {
            log::info!("port {port} released after SIGKILL");
            Ok(())
        } else {
            Err(SupervisorError::PortBusy {
                port,
                pids: remaining,
            })
        }
    }
}

fn send_all(pids: &[i32], sig: Signal) {
    for &pid in pids {
        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("{sig:?} to pid {pid} failed: {e}"),
        }
    }
}

/// Sorted, deduplicated PIDs; one process can listen on v4 and v6 at once.
/// Our own PID is dropped.
fn occupant_pids(raw: impl IntoIterator<Item = u32>) -> Vec<i32> {
    let me = std::process::id();
    let mut pids: Vec<i32> = raw
        .into_iter()
        .filter(|&pid| pid > 0 && pid != me)
        .filter_map(|pid| i32::try_from(pid).ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
