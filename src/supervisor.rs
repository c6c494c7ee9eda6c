//! The supervision loop: one child, restarted on crash, on request, or on
//! code change, and shut down with the supervisor.

use std::time::Duration;

use crossbeam_channel::{after, select, tick};

use crate::config::SupervisionConfig;
use crate::lifecycle::{ManagedProcess, ShutdownOutcome};
use crate::pidfile::PidFile;
use crate::port::PortGuardian;
use crate::signals::ShutdownSource;
use crate::state_machine::{ExitKind, ShutdownReason, State, after_exit, classify_exit};
use crate::watch::{ChangeDetector, ChangeState, has_changed};

/// How often sleeps check for a pending termination request.
const SIGNAL_POLL: Duration = Duration::from_millis(100);

pub struct Supervisor<S: ShutdownSource> {
    config: SupervisionConfig,
    guardian: PortGuardian,
    detector: Option<ChangeDetector>,
    pid_file: PidFile,
    shutdown: S,
    state: State,
    process: Option<ManagedProcess>,
    changes: ChangeState,
    spawns: u64,
}

impl<S: ShutdownSource> Supervisor<S> {
    pub fn new(config: SupervisionConfig, shutdown: S) -> Self {
        let detector = config
            .watch
            .enabled
            .then(|| ChangeDetector::from_config(&config.watch));
        let pid_file = PidFile::new(&config.pid_file);
        Self {
            config,
            guardian: PortGuardian::new(),
            detector,
            pid_file,
            shutdown,
            state: State::Idle,
            process: None,
            changes: ChangeState::default(),
            spawns: 0,
        }
    }

    pub fn with_port_guardian(mut self, guardian: PortGuardian) -> Self {
        self.guardian = guardian;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The live child, if any.
    pub fn process(&self) -> Option<&ManagedProcess> {
        self.process.as_ref()
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Successful spawns so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawns
    }

    /// Drive the state machine until the supervisor is told to exit.
    pub fn run(&mut self) {
        log::info!(
            "supervising {:?} (cwd {}, port {}, pid file {})",
            self.config.command_line(),
            self.config.working_dir.display(),
            self.config.port,
            self.pid_file.path().display()
        );
        while !self.state.is_terminal() {
            self.step();
        }
        log::info!("supervisor exiting after {} spawn(s)", self.spawns);
    }

    /// Perform one transition and return the new state.
    pub fn step(&mut self) -> State {
        let next = if self.exit_requested() {
            match self.state {
                State::ShuttingDown(ShutdownReason::SupervisorExit) => {
                    self.shut_down(ShutdownReason::SupervisorExit)
                }
                State::Exiting => State::Exiting,
                _ if self.process.is_some() => {
                    State::ShuttingDown(ShutdownReason::SupervisorExit)
                }
                _ => self.finish(),
            }
        } else {
            match self.state {
                State::Idle => State::Starting,
                State::Starting => self.start(),
                State::Running => self.poll_running(),
                State::ShuttingDown(reason) => self.shut_down(reason),
                State::Backoff(delay) => self.back_off(delay),
                State::Exiting => State::Exiting,
            }
        };
        if next != self.state {
            log::info!("{} -> {}", self.state, next);
        }
        self.state = next;
        next
    }

    fn exit_requested(&self) -> bool {
        self.shutdown.requested()
    }

    fn start(&mut self) -> State {
        if let Err(e) = self.guardian.ensure_port_free(self.config.port) {
            log::error!("{e}");
            return State::Backoff(self.config.crash_backoff());
        }

        let process = match ManagedProcess::spawn(&self.config) {
            Ok(process) => process,
            Err(e) => {
                log::error!("{e}");
                return State::Backoff(self.config.crash_backoff());
            }
        };

        if let Err(e) = self.pid_file.write(process.pid()) {
            log::error!("{e}");
        }
        self.spawns += 1;
        self.process = Some(process);
        self.changes = self.sample().unwrap_or_default();
        State::Running
    }

    fn poll_running(&mut self) -> State {
        if self.sleep(self.config.poll_interval()) {
            return State::ShuttingDown(ShutdownReason::SupervisorExit);
        }

        let Some(process) = self.process.as_mut() else {
            log::warn!("running without a child, starting a new one");
            return State::Starting;
        };

        if let Some(code) = process.try_exit_code() {
            let uptime = process.uptime();
            let kind = classify_exit(code, self.config.restart_sentinel);
            match kind {
                ExitKind::RestartRequested => log::info!(
                    "child exited with restart code {code} after {:.1}s",
                    uptime.as_secs_f64()
                ),
                ExitKind::Clean => log::warn!(
                    "child exited cleanly after {:.1}s",
                    uptime.as_secs_f64()
                ),
                ExitKind::Crashed(code) => log::error!(
                    "child crashed with code {code} after {:.1}s",
                    uptime.as_secs_f64()
                ),
            }
            self.reap();
            return after_exit(
                kind,
                self.config.crash_backoff(),
                self.config.normal_exit_backoff(),
            );
        }

        if let Some(current) = self.sample() {
            let changed = has_changed(self.changes, current);
            self.changes = current;
            if changed {
                log::info!("source change detected under {}", self.config.watch_root().display());
                return State::ShuttingDown(ShutdownReason::CodeChange);
            }
        }
        State::Running
    }

    fn shut_down(&mut self, reason: ShutdownReason) -> State {
        let released = self.stop_child();

        match reason {
            ShutdownReason::SupervisorExit if released => self.finish(),
            ShutdownReason::SupervisorExit => State::Exiting,
            ShutdownReason::CodeChange => {
                self.sleep(self.config.restart_pause());
                State::Starting
            }
        }
    }

    fn back_off(&mut self, delay: Duration) -> State {
        log::info!("restarting in {:.1}s", delay.as_secs_f64());
        self.sleep(delay);
        State::Starting
    }

    /// Terminal transition; the child is already gone.
    fn finish(&mut self) -> State {
        self.clear_pid_file();
        State::Exiting
    }

    /// Confirm a naturally exited child is fully gone, stragglers included.
    fn reap(&mut self) {
        self.stop_child();
    }

    /// Shut the child's group down. The PID file is removed only once the
    /// leader is known dead; otherwise it keeps naming the survivor.
    /// Returns false when the kill could not be confirmed.
    fn stop_child(&mut self) -> bool {
        let Some(process) = self.process.take() else {
            return true;
        };
        let pid = process.pid();
        let outcome = process.shutdown(self.config.grace_period());
        match outcome {
            ShutdownOutcome::Forced => log::warn!("pid {pid} had to be force-killed"),
            ShutdownOutcome::Unconfirmed => log::error!(
                "pid {pid} may still be running after SIGKILL; leaving {} in place",
                self.pid_file.path().display()
            ),
            ShutdownOutcome::Graceful | ShutdownOutcome::AlreadyExited { .. } => {}
        }
        if outcome.is_confirmed() {
            self.clear_pid_file();
        }
        outcome.is_confirmed()
    }

    fn clear_pid_file(&self) {
        if let Err(e) = self.pid_file.remove() {
            log::error!("{e}");
        }
    }

    /// `None` when watching is off or the walk failed; the previous state
    /// is then kept and no restart happens.
    fn sample(&self) -> Option<ChangeState> {
        let detector = self.detector.as_ref()?;
        match detector.sample(self.config.watch_root()) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("{e}; change detection skipped this cycle");
                None
            }
        }
    }

    /// Sleep for `total`, waking early on a termination request.
    /// Returns true when interrupted.
    fn sleep(&self, total: Duration) -> bool {
        if self.exit_requested() {
            return true;
        }
        let deadline = after(total);
        let ticker = tick(SIGNAL_POLL);
        loop {
            select! {
                recv(deadline) -> _ => return false,
                recv(ticker) -> _ => {
                    if self.exit_requested() {
                        return true;
                    }
                }
            }
        }
    }
}
