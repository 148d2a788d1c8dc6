//! gsm - command-line front end for the game server supervisor.
//!
//! One-shot commands (`stop`, `send`, `info`, `status`) re-attach to servers
//! started by an earlier invocation. `run` hosts servers with the watchdog
//! until Ctrl-C. Results are printed on stdout as JSON; logs go to stderr.

mod handlers;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gsm_core::{
    CancellationToken, JsonSettings, JsonStatusStore, ProcessSupervisor, SupervisorError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "gsm")]
#[command(about = "Supervise dedicated game server processes")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file (defaults to <config dir>/gsm/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Status file (defaults to <config dir>/gsm/status.json)
    #[arg(long, global = true)]
    status_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Start a server
    Start { name: String },
    /// Stop a server, killing it if it ignores the stop command
    Stop { name: String },
    /// Send a console command to a running server
    Send {
        name: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Show CPU, memory and uptime of a running server
    Info { name: String },
    /// Show the persisted status of a server
    Status { name: String },
    /// Start servers and keep them running until Ctrl-C
    Run {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let default_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

fn build_supervisor(args: &Args) -> Result<ProcessSupervisor> {
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(JsonSettings::default_path);
    let settings = JsonSettings::load(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    info!("Settings: {}", settings.path().display());

    let status_path = args
        .status_file
        .clone()
        .unwrap_or_else(JsonStatusStore::default_path);
    let status = JsonStatusStore::new(status_path);

    Ok(ProcessSupervisor::new(Arc::new(settings), Arc::new(status)))
}

/// Cancelled on Ctrl-C. Only the commands that host servers install it.
fn interrupt_token() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("installing Ctrl-C handler")?;
    Ok(token)
}

fn execute(args: Args) -> Result<()> {
    let supervisor = build_supervisor(&args)?;

    let output = match &args.command {
        Command::Start { name } => handlers::start(&supervisor, name, &interrupt_token()?)?,
        Command::Stop { name } => handlers::stop(&supervisor, name)?,
        Command::Send { name, text } => handlers::send(&supervisor, name, text)?,
        Command::Info { name } => handlers::info(&supervisor, name)?,
        Command::Status { name } => handlers::status(&supervisor, name)?,
        Command::Run { names } => handlers::run(&supervisor, names, &interrupt_token()?)?,
    };

    // Intentional stdout: the command result for scripts
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SupervisorError>()
        .map(SupervisorError::exit_code)
        .unwrap_or(1)
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(err) = execute(args) {
        error!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}
