use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};

/// Config file picked up from the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "respawnd.toml";

/// Everything the supervisor needs, loaded once at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    /// argv of the managed process; the first element is the program
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    /// TCP port the child binds (0 = do not guard any port)
    pub port: u16,
    pub pid_file: PathBuf,
    /// Exit code the child uses to ask for an immediate restart
    pub restart_sentinel: i32,
    pub poll_interval_ms: u64,
    pub grace_period_secs: u64,
    pub crash_backoff_secs: u64,
    pub normal_exit_backoff_secs: u64,
    /// Pause after a restart-driven shutdown so the OS releases the port
    pub restart_pause_ms: u64,
    /// Child stdout/stderr go to a fresh file in here on every spawn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Extra environment for the child, applied over the inherited one
    pub env: HashMap<String, String>,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Defaults to `working_dir`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            extensions: ["py", "rs", "js", "ts", "go"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: ["venv", ".venv", "env", "__pycache__", "node_modules", "target"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            working_dir: PathBuf::from("."),
            port: 0,
            pid_file: PathBuf::from("respawnd.pid"),
            restart_sentinel: 42,
            poll_interval_ms: 1000,
            grace_period_secs: 10,
            crash_backoff_secs: 2,
            normal_exit_backoff_secs: 10,
            restart_pause_ms: 1000,
            log_dir: None,
            env: HashMap::new(),
            watch: WatchConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub pid_file: Option<PathBuf>,
    pub restart_sentinel: Option<i32>,
    pub grace_period_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub no_watch: bool,
}

impl SupervisionConfig {
    /// Parse a TOML config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SupervisorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
            .map_err(|e| SupervisorError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| SupervisorError::Config(e.to_string()))
    }

    /// Load `path` if given, else `respawnd.toml` if it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, o: Overrides) {
        if !o.command.is_empty() {
            self.command = o.command;
        }
        if let Some(dir) = o.working_dir {
            self.working_dir = dir;
        }
        if let Some(port) = o.port {
            self.port = port;
        }
        if let Some(pid_file) = o.pid_file {
            self.pid_file = pid_file;
        }
        if let Some(code) = o.restart_sentinel {
            self.restart_sentinel = code;
        }
        if let Some(secs) = o.grace_period_secs {
            self.grace_period_secs = secs;
        }
        if let Some(ms) = o.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(dir) = o.log_dir {
            self.log_dir = Some(dir);
        }
        if o.no_watch {
            self.watch.enabled = false;
        }
    }

    /// Anchor relative paths at `working_dir`.
    pub fn resolve_paths(mut self) -> Self {
        let base = self.working_dir.clone();
        let anchor = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.pid_file = anchor(self.pid_file);
        self.log_dir = self.log_dir.map(anchor);
        self.watch.root = self.watch.root.map(anchor);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(SupervisorError::Config("command must not be empty".into()));
        }
        if self.grace_period_secs == 0 {
            return Err(SupervisorError::Config(
                "grace_period_secs must be greater than zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SupervisorError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.watch.enabled && self.watch.extensions.is_empty() {
            return Err(SupervisorError::Config(
                "watch.extensions must list at least one extension".into(),
            ));
        }
        if !(0..=255).contains(&self.restart_sentinel) {
            return Err(SupervisorError::Config(format!(
                "restart_sentinel {} is not a possible exit status (0-255)",
                self.restart_sentinel
            )));
        }
        if self.restart_sentinel > 128 {
            log::warn!(
                "restart_sentinel {} collides with death by signal {}",
                self.restart_sentinel,
                self.restart_sentinel - 128
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn crash_backoff(&self) -> Duration {
        Duration::from_secs(self.crash_backoff_secs)
    }

    pub fn normal_exit_backoff(&self) -> Duration {
        Duration::from_secs(self.normal_exit_backoff_secs)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }

    pub fn watch_root(&self) -> &Path {
        self.watch.root.as_deref().unwrap_or(&self.working_dir)
    }

    /// Human-readable command line for log messages.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}
