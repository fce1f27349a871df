//! brewsync CLI - runs the sync bridge and manages its config and session
//!
//! Logs go to stderr; stdout carries command output and, for `run`, the
//! JSON-lines UI protocol.

mod auth;
mod cli;
mod commands;
mod config;
mod error;
mod stdio_ui;


use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::pull::run_pull;
use crate::commands::push::run_push;
use crate::commands::run::run_bridge;
use crate::commands::CommandContext;
use crate::config::resolve_config_path;
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
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy()
                .add_directive(
                    "brewsync=info"
                        .parse()
                        .map_err(|error| CliError::Config(format!("{error}")))?,
                ),
        )
        .init();

    let cli = Cli::parse();
    let context = CommandContext {
        config_path: resolve_config_path(cli.config.as_deref())?,
        profile: cli.profile,
    };

    match cli.command {
        Commands::Run => run_bridge(&context).await?,
        Commands::Pull { collection, json } => run_pull(&context, collection, json).await?,
        Commands::Push { collection, file } => {
            run_push(&context, collection, file.as_deref()).await?;
        }
        Commands::Auth { command } => run_auth(command, &context).await?,
        Commands::Config { command } => run_config(command, &context)?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}
