use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use respawnd::config::Overrides;

#[derive(Parser, Debug)]
#[command(version, about = "respawnd single-process supervisor")]
pub struct Args {
    /// Sub‑commands (run, status, config)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Supervise the command in the foreground (default if no sub‑command)
    Run(RunArgs),
    /// Report whether the managed process is alive (Exit 0 = running, 1 = stopped)
    Status {
        /// Path to configuration file
        #[arg(long, short = 'c', env = "RESPAWND_CONFIG")]
        config: Option<PathBuf>,

        /// PID file to inspect (overrides the config file)
        #[arg(long, env = "RESPAWND_PID_FILE")]
        pid_file: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config(RunArgs),
}

#[derive(ClapArgs, Debug, Default, Clone)]
pub struct RunArgs {
    /// Path to configuration file (default: ./respawnd.toml if present)
    #[arg(long, short = 'c', env = "RESPAWND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Working directory of the managed process
    #[arg(long, env = "RESPAWND_CWD")]
    pub cwd: Option<PathBuf>,

    /// TCP port to clear before each spawn (0 = disabled)
    #[arg(long, short = 'p', env = "RESPAWND_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "RESPAWND_PID_FILE")]
    pub pid_file: Option<PathBuf>,

    /// Exit code the child uses to request an immediate restart
    #[arg(long, env = "RESPAWND_SENTINEL", allow_negative_numbers = true)]
    pub sentinel: Option<i32>,

    /// Seconds to wait after SIGTERM before SIGKILL
    #[arg(long, env = "RESPAWND_GRACE")]
    pub grace: Option<u64>,

    /// Poll interval in milliseconds
    #[arg(long, env = "RESPAWND_POLL_MS")]
    pub poll_ms: Option<u64>,

    /// Directory for per-spawn child output logs
    #[arg(long, env = "RESPAWND_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Disable restart on source change
    #[arg(long)]
    pub no_watch: bool,

    /// Command to supervise
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            command: self.command.clone(),
            working_dir: self.cwd.clone(),
            port: self.port,
            pid_file: self.pid_file.clone(),
            restart_sentinel: self.sentinel,
            grace_period_secs: self.grace,
            poll_interval_ms: self.poll_ms,
            log_dir: self.log_dir.clone(),
            no_watch: self.no_watch,
        }
    }
}
