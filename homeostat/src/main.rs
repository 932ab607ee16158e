//! Homeostatic agent control loop.
//!
//! Meant to be invoked by an external scheduler (e.g. cron) once per cycle.
//! Each command prints a JSON report to stdout; diagnostics go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use homeostat::consolidate::run_consolidation;
use homeostat::cycle::{CycleStatus, run_cycle};
use homeostat::exit_codes;
use homeostat::io::config::load_config;
use homeostat::io::init::{HomeostatPaths, InitOptions, init_homeostat};
use homeostat::io::lock::CycleLockedError;
use homeostat::io::reasoner::ClaudeReasoner;
use homeostat::io::telemetry::HostTelemetry;
use homeostat::logging;
use homeostat::status::{health_report, status_report};

#[derive(Parser)]
#[command(
    name = "homeostat",
    version,
    about = "Homeostatic control loop with an adaptive capability registry"
)]
struct Cli {
    /// Directory containing `.homeostat/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Log progress at info level when `RUST_LOG` is unset.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.homeostat/` with default config and empty state.
    Init {
        /// Overwrite existing files and reset state.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one control cycle.
    Cycle,
    /// Print persisted state, registry, and backoff summary.
    Status,
    /// Probe host health and print the criticality estimate without saving it.
    Health,
    /// Consolidate recent experiences into the registry now.
    Consolidate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(&cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            let code = if err.downcast_ref::<CycleLockedError>().is_some() {
                exit_codes::LOCKED
            } else {
                exit_codes::ERROR
            };
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Cycle => cmd_cycle(root),
        Command::Status => print_json(&status_report(root, Utc::now())?),
        Command::Health => cmd_health(root),
        Command::Consolidate => cmd_consolidate(root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_homeostat(root, &InitOptions { force }, Utc::now())?;
    println!("{}", paths.home_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_cycle(root: &Path) -> Result<i32> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let reasoner = ClaudeReasoner::from_config(&cfg.delegate);
    let telemetry = HostTelemetry::new(root, &paths.tasks_dir, &cfg.scheduler_marker);
    let outcome = run_cycle(root, &reasoner, &telemetry)?;
    print_json(&outcome)?;
    Ok(match outcome.status {
        CycleStatus::BackoffSkipped { .. } => exit_codes::BACKOFF,
        _ => exit_codes::OK,
    })
}

fn cmd_health(root: &Path) -> Result<i32> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let telemetry = HostTelemetry::new(root, &paths.tasks_dir, &cfg.scheduler_marker);
    print_json(&health_report(root, &telemetry, Utc::now())?)
}

fn cmd_consolidate(root: &Path) -> Result<i32> {
    let paths = HomeostatPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let reasoner = ClaudeReasoner::from_config(&cfg.delegate);
    print_json(&run_consolidation(root, &reasoner, Utc::now())?)
}

fn print_json<T: Serialize>(value: &T) -> Result<i32> {
    let payload = serde_json::to_string_pretty(value).context("serialize report")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}
