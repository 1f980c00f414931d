//! CLI entry point for tcon.
//!
//! ```bash
//! tcon                              # interactive shell
//! tcon exec goto-angle 40           # one command, then exit
//! tcon lock-status                  # who owns the device
//! tcon --port /dev/ttyUSB1 --log-level debug
//! ```
//!
//! Startup order is fixed: configuration, logging, instance lock, transport.
//! The lock is taken before the port is opened and released after it is
//! closed, on every exit path including Ctrl-C. The runtime is then shut down
//! without waiting, since a console read parked in the blocking pool cannot be
//! cancelled.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tcon::config::Settings;
use tcon::dispatcher::CommandDispatcher;
use tcon::journal::Journal;
use tcon::logging;
use tcon::shell::{self, Console};
use tcon_core::{InstanceLock, LockStatus, StageError};
use tokio::io::{BufReader, Stdin, Stdout};

#[derive(Parser)]
#[command(name = "tcon")]
#[command(about = "Serial control for motorized target stages", long_about = None)]
struct Cli {
    /// Config file (default: ./tcon.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Instance lock file, overriding the configuration
    #[arg(long, global = true)]
    lock_path: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive shell (default)
    Shell,

    /// Run a single command and exit
    Exec {
        /// Command and arguments, e.g. `goto-position 800`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Report whether another instance holds the device
    LockStatus,
}

type StdConsole = Console<BufReader<Stdin>, Stdout>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("tcon: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // Lock and transport are already released here.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tcon: {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<StageError>() {
        Some(StageError::LockHeld { .. }) => ExitCode::from(2),
        Some(StageError::TransportUnavailable { .. }) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    let command = cli.command.unwrap_or(Commands::Shell);
    if let Commands::LockStatus = command {
        return report_lock_status(&settings);
    }

    let mut lock = InstanceLock::new(&settings.lock.path);
    lock.acquire_exclusive()?;

    let result = run_session(&settings, command).await;

    lock.release();
    result
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = &cli.port {
        settings.serial.port = port.clone();
    }
    if let Some(path) = &cli.lock_path {
        settings.lock.path = path.clone();
    }
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    settings
        .validate()
        .context("Invalid command-line override")?;
    Ok(settings)
}

fn report_lock_status(settings: &Settings) -> Result<()> {
    let mut lock = InstanceLock::new(&settings.lock.path);
    match lock.acquire()? {
        LockStatus::Acquired => {
            println!("{}: free", settings.lock.path.display());
        }
        LockStatus::AlreadyHeld { holder_pid } => {
            let holder = holder_pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
            println!("{}: held by pid {}", settings.lock.path.display(), holder);
        }
    }
    lock.release();
    Ok(())
}

/// Open the transport, drive the session, and close the transport whether
/// the session ended normally, failed, or was interrupted.
async fn run_session(settings: &Settings, command: Commands) -> Result<()> {
    let mut dispatcher = CommandDispatcher::open(settings).await?;
    let mut journal = Journal::open(&settings.journal);
    let mut console: StdConsole = Console::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());

    let outcome = {
        let work = drive(&mut dispatcher, &mut console, &mut journal, command);
        tokio::select! {
            result = work => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted; shutting down");
                eprintln!("\ninterrupted");
                Ok(())
            }
        }
    };

    dispatcher.close().await;
    journal.persist();
    outcome
}

async fn drive(
    dispatcher: &mut CommandDispatcher,
    console: &mut StdConsole,
    journal: &mut Journal,
    command: Commands,
) -> Result<()> {
    dispatcher.initialize().await?;

    match command {
        Commands::Exec { command } => {
            let line = command.join(" ");
            journal.record(&line);
            let outcome = dispatcher.execute(&line, console).await?;
            console.say(&outcome.to_string()).await?;
        }
        Commands::Shell | Commands::LockStatus => {
            println!("tcon: type 'help' for commands, 'exit' to quit");
            shell::run_shell(dispatcher, console, journal).await?;
        }
    }
    Ok(())
}
