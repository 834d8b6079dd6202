//! qrtag CLI - scan QR codes into events from the terminal
//!
//! Every change lands in the local store first and reaches the server on the
//! next sync, so the CLI keeps working without a network.

mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::codes::run_codes;
use crate::commands::common::{resolve_db_path, Context};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::event::run_event;
use crate::commands::export::run_export;
use crate::commands::process::run_process;
use crate::commands::scan::run_scan;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qrtag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context {
        db_path: resolve_db_path(cli.db_path)?,
        offline: cli.offline,
        api_url: cli.api_url,
    };

    match cli.command {
        Commands::Auth { command } => run_auth(command, &context).await?,
        Commands::Event { command } => run_event(command, &context).await?,
        Commands::Scan { event, content } => run_scan(&event, &content, &context).await?,
        Commands::Codes {
            event,
            unprocessed,
            json,
        } => run_codes(&event, unprocessed, json, &context).await?,
        Commands::Process { event } => run_process(&event, &context).await?,
        Commands::Sync { command } => run_sync(command, &context).await?,
        Commands::Export {
            event,
            format,
            output,
        } => run_export(&event, format, output.as_deref(), &context).await?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        Commands::Config { command } => run_config(command, &context)?,
    }

    Ok(())
}
