//! # Supervision Loop Tests
//!
//! Drive the state machine one transition at a time against real child
//! processes (`sh`, `sleep`) in temporary working directories:
//!
//! - PID file contents after a successful start
//! - Exit-code policy (restart sentinel, clean exit, crash)
//! - Restart on source change
//! - Supervisor termination during `Running`, `Backoff` and `Starting`
//! - Spawn failure recovery
//! - Clearing a foreign listener off the configured port

use std::fs;
use std::io::{BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant, SystemTime};

use respawnd::config::SupervisionConfig;
use respawnd::lifecycle::{group_alive, is_alive};
use respawnd::port::PortGuardian;
use respawnd::signals::ShutdownFlag;
use respawnd::state_machine::{ShutdownReason, State};
use respawnd::supervisor::Supervisor;

// ─── Helpers ────────────────────────────────────────────────────────

fn config(dir: &Path, command: &[&str]) -> SupervisionConfig {
    let mut cfg = SupervisionConfig {
        command: command.iter().map(|s| s.to_string()).collect(),
        working_dir: dir.to_path_buf(),
        pid_file: dir.join("child.pid"),
        restart_sentinel: 42,
        poll_interval_ms: 50,
        grace_period_secs: 2,
        crash_backoff_secs: 1,
        normal_exit_backoff_secs: 5,
        restart_pause_ms: 10,
        ..Default::default()
    };
    cfg.watch.extensions = vec!["py".into()];
    cfg
}

fn supervisor(cfg: SupervisionConfig) -> (Supervisor<ShutdownFlag>, ShutdownFlag) {
    let flag = ShutdownFlag::new();
    (Supervisor::new(cfg, flag.clone()), flag)
}

/// Step from Idle until the child is running.
fn start(sup: &mut Supervisor<ShutdownFlag>) {
    assert_eq!(sup.step(), State::Starting);
    assert_eq!(sup.step(), State::Running);
}

/// Keep stepping while `Running`, bounded by `limit`.
fn step_until_not_running(sup: &mut Supervisor<ShutdownFlag>, limit: Duration) -> State {
    let deadline = Instant::now() + limit;
    loop {
        let state = sup.step();
        if state != State::Running || Instant::now() >= deadline {
            return state;
        }
    }
}

fn read_pid(path: &Path) -> i32 {
    fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

/// Orphaned group members are reaped by init, so give it a moment.
fn wait_group_gone(pgid: i32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while group_alive(pgid) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    true
}

/// A python3 TCP listener on an ephemeral port; `None` without python3.
fn spawn_listener() -> Option<(Child, u16)> {
    let python = which::which("python3").ok()?;
    let script = r#"
import socket, time
s = socket.socket()
s.bind(("127.0.0.1", 0))
s.listen()
print(s.getsockname()[1], flush=True)
time.sleep(60)
"#;
    let mut child = Command::new(python)
        .args(["-c", script])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    Some((child, line.trim().parse().unwrap()))
}

// ─── PID file ───────────────────────────────────────────────────────

#[test]
fn test_pid_file_names_spawned_child() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, flag) = supervisor(config(dir.path(), &["sleep", "30"]));
    start(&mut sup);

    let pid = sup.process().unwrap().pid();
    assert_eq!(read_pid(&dir.path().join("child.pid")), pid);
    assert!(is_alive(pid));
    assert_eq!(sup.spawn_count(), 1);

    flag.trigger();
    sup.run();
    assert!(!dir.path().join("child.pid").exists());
}

// ─── Exit-code policy ───────────────────────────────────────────────

#[test]
fn test_sentinel_exit_restarts_without_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, flag) = supervisor(config(dir.path(), &["sh", "-c", "exit 42"]));
    start(&mut sup);

    let state = step_until_not_running(&mut sup, Duration::from_secs(5));
    assert_eq!(state, State::Starting);
    assert!(!dir.path().join("child.pid").exists());

    assert_eq!(sup.step(), State::Running);
    assert_eq!(sup.spawn_count(), 2);

    flag.trigger();
    sup.run();
}

#[test]
fn test_clean_exit_uses_normal_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _flag) = supervisor(config(dir.path(), &["sh", "-c", "exit 0"]));
    start(&mut sup);

    let state = step_until_not_running(&mut sup, Duration::from_secs(5));
    assert_eq!(state, State::Backoff(Duration::from_secs(5)));
}

#[test]
fn test_crash_uses_crash_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, _flag) = supervisor(config(dir.path(), &["sh", "-c", "exit 3"]));
    start(&mut sup);

    let state = step_until_not_running(&mut sup, Duration::from_secs(5));
    assert_eq!(state, State::Backoff(Duration::from_secs(1)));
}

#[test]
fn test_backoff_waits_then_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, flag) = supervisor(config(dir.path(), &["sh", "-c", "exit 1"]));
    start(&mut sup);
    assert_eq!(
        step_until_not_running(&mut sup, Duration::from_secs(5)),
        State::Backoff(Duration::from_secs(1))
    );

    let started = Instant::now();
    assert_eq!(sup.step(), State::Starting);
    assert!(started.elapsed() >= Duration::from_secs(1));

    flag.trigger();
    sup.run();
}

// ─── Code change ────────────────────────────────────────────────────

#[test]
fn test_source_change_restarts_child() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("app.py");
    fs::write(&source, "print('v1')\n").unwrap();
    fs::File::options()
        .append(true)
        .open(&source)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(60))
        .unwrap();

    let (mut sup, flag) = supervisor(config(dir.path(), &["sleep", "30"]));
    start(&mut sup);
    let first_pid = sup.process().unwrap().pid();

    // nothing changed yet
    assert_eq!(sup.step(), State::Running);

    fs::File::options()
        .append(true)
        .open(&source)
        .unwrap()
        .set_modified(SystemTime::now())
        .unwrap();
    assert_eq!(
        sup.step(),
        State::ShuttingDown(ShutdownReason::CodeChange)
    );
    assert_eq!(sup.step(), State::Starting);
    assert!(!is_alive(first_pid));
    assert!(!dir.path().join("child.pid").exists());

    assert_eq!(sup.step(), State::Running);
    let second_pid = sup.process().unwrap().pid();
    assert_ne!(first_pid, second_pid);
    assert_eq!(read_pid(&dir.path().join("child.pid")), second_pid);

    flag.trigger();
    sup.run();
}

#[test]
fn test_non_matching_files_do_not_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, flag) = supervisor(config(dir.path(), &["sleep", "30"]));
    start(&mut sup);

    fs::write(dir.path().join("notes.txt"), "hello").unwrap();
    assert_eq!(sup.step(), State::Running);

    flag.trigger();
    sup.run();
}

#[test]
fn test_watch_disabled_ignores_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["sleep", "30"]);
    cfg.watch.enabled = false;
    let (mut sup, flag) = supervisor(cfg);
    start(&mut sup);

    fs::write(dir.path().join("app.py"), "print('new')\n").unwrap();
    assert_eq!(sup.step(), State::Running);

    flag.trigger();
    sup.run();
}

// ─── Supervisor termination ─────────────────────────────────────────

#[test]
fn test_termination_during_running_stops_group_and_clears_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, flag) = supervisor(config(dir.path(), &["sleep", "100"]));
    start(&mut sup);
    let pid = sup.process().unwrap().pid();
    let pgid = sup.process().unwrap().pgid();

    let started = Instant::now();
    flag.trigger();
    assert_eq!(
        sup.step(),
        State::ShuttingDown(ShutdownReason::SupervisorExit)
    );
    assert_eq!(sup.step(), State::Exiting);

    // grace period + one poll interval, with slack
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!is_alive(pid));
    assert!(!group_alive(pgid));
    assert!(!dir.path().join("child.pid").exists());
    assert!(sup.process().is_none());

    // terminal
    assert_eq!(sup.step(), State::Exiting);
}

#[test]
fn test_termination_forces_stubborn_child() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["sh", "-c", "trap '' TERM; while :; do sleep 1; done"]);
    cfg.grace_period_secs = 1;
    let (mut sup, flag) = supervisor(cfg);
    start(&mut sup);
    let pid = sup.process().unwrap().pid();
    let pgid = sup.process().unwrap().pgid();
    std::thread::sleep(Duration::from_millis(300));

    flag.trigger();
    sup.run();

    assert_eq!(sup.state(), State::Exiting);
    assert!(!is_alive(pid));
    assert!(wait_group_gone(pgid, Duration::from_secs(2)));
    assert!(!dir.path().join("child.pid").exists());
}

#[test]
fn test_termination_during_backoff_exits_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["sh", "-c", "exit 0"]);
    cfg.normal_exit_backoff_secs = 60;
    let (mut sup, flag) = supervisor(cfg);
    start(&mut sup);
    assert_eq!(
        step_until_not_running(&mut sup, Duration::from_secs(5)),
        State::Backoff(Duration::from_secs(60))
    );

    let waker = flag.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        waker.trigger();
    });

    let started = Instant::now();
    sup.run();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(sup.state(), State::Exiting);
    assert_eq!(sup.spawn_count(), 1);
}

// ─── Spawn failure ──────────────────────────────────────────────────

#[test]
fn test_spawn_failure_backs_off_and_keeps_supervising() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sup, flag) = supervisor(config(dir.path(), &["./does-not-exist"]));

    assert_eq!(sup.step(), State::Starting);
    assert_eq!(sup.step(), State::Backoff(Duration::from_secs(1)));
    assert!(!dir.path().join("child.pid").exists());
    assert_eq!(sup.spawn_count(), 0);

    assert_eq!(sup.step(), State::Starting);
    assert_eq!(sup.step(), State::Backoff(Duration::from_secs(1)));

    flag.trigger();
    assert_eq!(sup.step(), State::Exiting);
}

// ─── Port clearing ──────────────────────────────────────────────────

#[test]
fn test_occupied_port_is_cleared_before_spawn() {
    let Some((mut occupant, port)) = spawn_listener() else {
        eprintln!("python3 not available, skipping");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), &["sleep", "30"]);
    cfg.port = port;
    let flag = ShutdownFlag::new();
    let mut sup = Supervisor::new(cfg, flag.clone())
        .with_port_guardian(PortGuardian::new().with_polling(5, Duration::from_millis(200)));

    assert_eq!(sup.step(), State::Starting);
    assert!(sup.process().is_none());
    assert!(occupant.try_wait().unwrap().is_none());

    assert_eq!(sup.step(), State::Running);
    // the occupant was terminated by the port check, before our child existed
    let status = occupant.try_wait().unwrap().expect("occupant still running");
    assert_eq!(status.signal(), Some(15));
    assert!(is_alive(sup.process().unwrap().pid()));
    assert!(PortGuardian::new().occupants(port).is_empty());

    flag.trigger();
    sup.run();
}
