//! ftl2-runner CLI: worker-protocol and terminal entry points.

use clap::{ArgAction, Parser, Subcommand};
use ftl2_runner::automation::ScriptAutomation;
use ftl2_runner::config::Config;
use ftl2_runner::engine::terminal::parse_extravars;
use ftl2_runner::engine::{TerminalRun, Worker};
use ftl2_runner::error::Error;
use ftl2_runner::telemetry::{TelemetryConfig, init_telemetry};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Prefix of the private data dir created when none is given.
const TEMP_DIR_PREFIX: &str = "ftl2_runner_";

#[derive(Parser)]
#[command(
    name = "ftl2-runner",
    version,
    about = "Run automation jobs and stream them back as runner job events"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one job streamed over stdin, reporting over stdout
    Worker {
        /// Base directory for the job's data and artifacts
        #[arg(long)]
        private_data_dir: Option<PathBuf>,
        /// Delete the private data dir before and after the job
        #[arg(long)]
        delete: bool,
    },
    /// Run a script directly, writing ANSI-encoded events to stdout
    Playbook {
        /// Script to execute
        playbook: PathBuf,
        /// Inventory file or directory
        #[arg(short, long)]
        inventory: Option<PathBuf>,
        /// Extra variables: key=value, inline JSON, or @file
        #[arg(short = 'e', long = "extra-vars")]
        extra_vars: Vec<String>,
        /// Include results in outcome lines
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_telemetry(TelemetryConfig {
        log_level: config.log_level.clone(),
        ansi: std::io::stderr().is_terminal(),
    })?;

    let rc = match cli.command {
        Command::Worker {
            private_data_dir,
            delete,
        } => cmd_worker(&config, private_data_dir, delete)?,
        Command::Playbook {
            playbook,
            inventory,
            extra_vars,
            verbose,
        } => cmd_playbook(&config, playbook, inventory, &extra_vars, verbose)?,
    };
    std::process::exit(rc);
}

fn cmd_worker(
    config: &Config,
    private_data_dir: Option<PathBuf>,
    delete: bool,
) -> anyhow::Result<i32> {
    let dir = match private_data_dir {
        Some(dir) => {
            if delete {
                remove_dir(&dir);
            }
            dir
        }
        None => tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()?
            .keep(),
    };
    std::fs::create_dir_all(&dir)?;

    let outcome = Worker::new(std::io::stdin().lock(), std::io::stdout().lock(), &dir)
        .script_path(&config.script_path)
        .run();

    if delete {
        remove_dir(&dir);
    }
    Ok(outcome.rc)
}

fn cmd_playbook(
    config: &Config,
    playbook: PathBuf,
    inventory: Option<PathBuf>,
    extra_vars: &[String],
    verbose: u8,
) -> anyhow::Result<i32> {
    let mut automation = ScriptAutomation::new(&playbook);
    let run = TerminalRun {
        playbook,
        inventory,
        extravars: parse_extravars(extra_vars),
        verbosity: verbose,
        ansi_width: config.ansi_width,
        job_id: config.job_id,
    };

    match run.run(&mut automation, &mut std::io::stdout().lock()) {
        Ok(outcome) => Ok(outcome.rc),
        Err(Error::Automation(msg)) => {
            eprintln!("ERROR: {msg}");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_dir(dir: &std::path::Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to delete private data dir");
        }
    }
}
