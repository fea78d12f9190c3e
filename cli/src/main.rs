// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Clawster Orchestrator CLI
//!
//! The `clawster` binary hosts the bot lifecycle HTTP API.
//!
//! ## Commands
//!
//! - `clawster serve` - Run the HTTP API and the background usage meter
//! - `clawster meter` - Run a single metering cycle and exit
//! - `clawster config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use clawster_orchestrator::commands::{self, ConfigCommand, ServeArgs};

/// Clawster - Confidential bot provisioning
#[derive(Parser)]
#[command(name = "clawster")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CLAWSTER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CLAWSTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Run one usage metering cycle
    #[command(name = "meter")]
    Meter,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve(args)) => commands::serve::execute(args, cli.config).await,
        Some(Commands::Meter) => commands::meter::execute(cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
