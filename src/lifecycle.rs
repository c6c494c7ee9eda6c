//! Spawning, observing and terminating the managed process.
//!
//! The child is started in its own session, so it is the leader of a fresh
//! process group (pgid == pid). It is not tied to the supervisor's terminal
//! or process group and keeps running if the supervisor dies; every
//! termination below targets the whole group so grandchildren go with it.

use std::fs::{self, OpenOptions};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::config::SupervisionConfig;
use crate::error::{Result, SupervisorError};

/// Liveness poll cadence while waiting out the grace period.
const GRACE_POLL: Duration = Duration::from_secs(1);
/// How long to wait for SIGKILL to be confirmed.
const KILL_CONFIRM: Duration = Duration::from_secs(5);
const KILL_POLL: Duration = Duration::from_millis(100);

/// The one child this supervisor owns.
///
/// Deliberately neither `Clone` nor `Copy`: it is consumed by
/// [`ManagedProcess::shutdown`] and must not outlive confirmed exit.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    pid: Pid,
    pgid: Pid,
    started_at: DateTime<Utc>,
    started: Instant,
    log_path: Option<PathBuf>,
    exit_code: Option<i32>,
}

/// How a shutdown request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The leader had already exited and its group was empty.
    AlreadyExited { code: i32 },
    /// The group left within the grace period.
    Graceful,
    /// SIGKILL was needed.
    Forced,
    /// Even SIGKILL was not confirmed in time; the group may linger.
    Unconfirmed,
}

impl ShutdownOutcome {
    /// The leader is known to be dead.
    pub fn is_confirmed(self) -> bool {
        !matches!(self, ShutdownOutcome::Unconfirmed)
    }
}

impl ManagedProcess {
    /// Launch the configured command in its working directory, detached
    /// into a new session.
    pub fn spawn(config: &SupervisionConfig) -> Result<Self> {
        let command_line = config.command_line();
        let spawn_failed = |source| SupervisorError::SpawnFailed {
            command: command_line.clone(),
            source,
        };

        let (program, args) = config.command.split_first().ok_or_else(|| {
            spawn_failed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;

        let mut cmd = Command::new(resolve_program(program));
        cmd.args(args)
            .current_dir(&config.working_dir)
            .envs(&config.env)
            .stdin(Stdio::null());

        let log_path = match &config.log_dir {
            Some(dir) => {
                let path = output_log_path(dir, program);
                let (stdout, stderr) = open_output_log(&path).map_err(spawn_failed)?;
                cmd.stdout(stdout).stderr(stderr);
                Some(path)
            }
            None => None,
        };

        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(spawn_failed)?;
        let pid = Pid::from_raw(child.id() as i32);

        log::info!(
            "spawned {command_line:?} (pid {pid}, cwd {})",
            config.working_dir.display()
        );
        if let Some(path) = &log_path {
            log::info!("child output -> {}", path.display());
        }

        Ok(Self {
            child,
            pid,
            // setsid makes the child its own group leader
            pgid: pid,
            started_at: Utc::now(),
            started: Instant::now(),
            log_path,
            exit_code: None,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn pgid(&self) -> i32 {
        self.pgid.as_raw()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Non-blocking: `Some(code)` once the leader has exited.
    ///
    /// Reaps the leader on first observation; the code is cached.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_some() {
            return self.exit_code;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_code = Some(exit_code(status));
                self.exit_code
            }
            Ok(None) => None,
            Err(e) => {
                // ECHILD: somebody else reaped it. Fall back to kill(0).
                log::warn!("try_wait on pid {} failed: {e}", self.pid);
                if is_alive(self.pid()) {
                    None
                } else {
                    self.exit_code = Some(-1);
                    self.exit_code
                }
            }
        }
    }

    /// Block until the leader exits and return its exit code.
    pub fn wait(&mut self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        let code = match self.child.wait() {
            Ok(status) => exit_code(status),
            Err(e) => {
                log::warn!("wait on pid {} failed: {e}", self.pid);
                -1
            }
        };
        self.exit_code = Some(code);
        code
    }

    /// Leader reaped and no other member of its group left.
    fn gone(&mut self) -> bool {
        self.try_exit_code().is_some() && !group_alive(self.pgid())
    }

    /// SIGTERM the whole group, wait up to `grace`, then SIGKILL the group.
    ///
    /// Always returns; never blocks longer than `grace` plus the kill
    /// confirmation window.
    pub fn shutdown(mut self, grace: Duration) -> ShutdownOutcome {
        if self.gone() {
            let code = self.exit_code.unwrap_or(-1);
            log::info!("pid {} already exited (code {code})", self.pid);
            return ShutdownOutcome::AlreadyExited { code };
        }

        match signal::killpg(self.pgid, Signal::SIGTERM) {
            Ok(()) => log::info!("sent SIGTERM to process group {}", self.pgid),
            Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("SIGTERM to process group {} failed: {e}", self.pgid),
        }

        let start = Instant::now();
        let deadline = start + grace;
        loop {
            if self.gone() {
                log::info!(
                    "pid {} exited gracefully in {:.2}s",
                    self.pid,
                    start.elapsed().as_secs_f64()
                );
                return ShutdownOutcome::Graceful;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(GRACE_POLL.min(deadline - now));
        }

        let timed_out = SupervisorError::ShutdownTimedOut {
            pid: self.pid(),
            grace,
        };
        log::warn!("{timed_out}, escalating to SIGKILL");
        match signal::killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) => log::warn!("sent SIGKILL to process group {}", self.pgid),
            Err(Errno::ESRCH) => {}
            Err(e) => log::error!("SIGKILL to process group {} failed: {e}", self.pgid),
        }

        let kill_deadline = Instant::now() + KILL_CONFIRM;
        while Instant::now() < kill_deadline {
            // Orphaned members are reaped by init, not by us; only the
            // leader's exit is ours to confirm.
            if self.try_exit_code().is_some() {
                log::warn!("process group {} terminated by SIGKILL", self.pgid);
                return ShutdownOutcome::Forced;
            }
            std::thread::sleep(KILL_POLL);
        }
        log::error!(
            "process group {} did not confirm SIGKILL within {KILL_CONFIRM:?}",
            self.pgid
        );
        ShutdownOutcome::Unconfirmed
    }
}

/// Exit code, or `128 + signo` for signal deaths as shells report them.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => -1,
    }
}

/// `kill(pid, 0)`; a permission error still means the pid exists.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(signal::kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// `killpg(pgid, 0)`
pub fn group_alive(pgid: i32) -> bool {
    if pgid <= 1 {
        return false;
    }
    matches!(
        signal::killpg(Pid::from_raw(pgid), None),
        Ok(()) | Err(Errno::EPERM)
    )
}

/// Bare program names go through PATH lookup; anything with a separator is
/// left alone so it resolves against the child's working directory.
fn resolve_program(program: &str) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }
    which::which(program).unwrap_or_else(|_| {
        log::debug!("{program} not found in PATH, passing it through unchanged");
        PathBuf::from(program)
    })
}

fn output_log_path(dir: &Path, program: &str) -> PathBuf {
    let stem = Path::new(program)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "child".to_string());
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("{stem}-{stamp}.log"))
}

fn open_output_log(path: &Path) -> std::io::Result<(fs::File, fs::File)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let stdout = OpenOptions::new().create(true).append(true).open(path)?;
    let stderr = stdout.try_clone()?;
    Ok((stdout, stderr))
}
