//! The supervisor's own termination signals.
//!
//! SIGTERM and SIGINT are recorded by an async-signal-safe handler into an
//! atomic and consumed by the supervision loop on its next poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

// Cheap, polling-based Unix signal handling (lock-free).
static RECEIVED_SIGNAL: AtomicUsize = AtomicUsize::new(0);

extern "C" fn handler(sig: i32) {
    RECEIVED_SIGNAL.store(sig as usize, Ordering::SeqCst);
}

pub fn install_signal_handlers() -> anyhow::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { signal::sigaction(sig, &action) }.map_err(|e| {
            anyhow::anyhow!(
                "Failed to register {sig:?} handler: {e}. Signal handling is required for supervision."
            )
        })?;
    }
    Ok(())
}

/// Non-blocking check; returns `Some(signal)` once per delivery.
pub fn check_signals() -> Option<Signal> {
    let val = RECEIVED_SIGNAL.swap(0, Ordering::AcqRel);
    if val == 0 {
        return None;
    }
    match Signal::try_from(val as i32) {
        Ok(sig) => Some(sig),
        Err(e) => {
            log::error!("BUG: invalid signal number {val} from signal handler: {e}");
            None
        }
    }
}

/// Where the supervision loop learns that it should exit.
pub trait ShutdownSource {
    /// True once a termination request has arrived. Must keep returning
    /// true after that.
    fn requested(&self) -> bool;
}

/// Process-wide SIGTERM/SIGINT, latched on first delivery.
#[derive(Debug, Default)]
pub struct ProcessSignals {
    latched: AtomicBool,
}

impl ShutdownSource for ProcessSignals {
    fn requested(&self) -> bool {
        if self.latched.load(Ordering::Acquire) {
            return true;
        }
        if let Some(sig) = check_signals() {
            log::info!("received {sig:?}, starting orderly shutdown");
            self.latched.store(true, Ordering::Release);
            return true;
        }
        false
    }
}

/// Manually triggered shutdown, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ShutdownSource for ShutdownFlag {
    fn requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
