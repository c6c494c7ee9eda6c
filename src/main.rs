mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use respawnd::Supervisor;
use respawnd::config::SupervisionConfig;
use respawnd::control;
use respawnd::pidfile::PidFile;
use respawnd::signals::{self, ProcessSignals};

fn main() {
    // Initialize logger with custom format for the supervisor
    env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(e) = real_main() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let args = cli::Args::parse();

    match args.sub.unwrap_or(cli::Cmd::Run(cli::RunArgs::default())) {
        cli::Cmd::Run(run) => run_supervisor(&run),
        cli::Cmd::Status { config, pid_file } => handle_status(config.as_deref(), pid_file),
        cli::Cmd::Config(run) => handle_config(&run),
    }
}

/// Merge config file, environment and flags into a validated config.
fn effective_config(run: &cli::RunArgs) -> Result<SupervisionConfig> {
    let mut cfg = SupervisionConfig::discover(run.config.as_deref())
        .context("Failed to load configuration")?;
    cfg.apply(run.overrides());
    Ok(cfg.resolve_paths())
}

fn run_supervisor(run: &cli::RunArgs) -> Result<()> {
    let cfg = effective_config(run)?;
    cfg.validate().context("Refusing to start")?;

    signals::install_signal_handlers()?;
    info!("respawnd started (pid {})", std::process::id());

    let mut supervisor = Supervisor::new(cfg, ProcessSignals::default());
    supervisor.run();

    info!("respawnd exiting");
    Ok(())
}

/// Handle status command - check if the managed process is alive
fn handle_status(config: Option<&Path>, pid_file: Option<std::path::PathBuf>) -> Result<()> {
    let path = match pid_file {
        Some(path) => path,
        None => {
            SupervisionConfig::discover(config)
                .context("Failed to load configuration")?
                .resolve_paths()
                .pid_file
        }
    };
    match control::check_status(&PidFile::new(path)) {
        Ok(status) => {
            println!("{status}");
            std::process::exit(if status.is_running() { 0 } else { 1 });
        }
        Err(e) => {
            eprintln!("Error checking status: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Handle config command - print the merged configuration
fn handle_config(run: &cli::RunArgs) -> Result<()> {
    let cfg = effective_config(run)?;
    let rendered = toml::to_string_pretty(&cfg).context("Failed to serialize config")?;
    print!("{rendered}");
    if let Err(e) = cfg.validate() {
        eprintln!("warning: {e}");
    }
    Ok(())
}
