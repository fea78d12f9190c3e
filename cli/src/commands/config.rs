// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use clawster_core::domain::bot::InstanceSize;
use clawster_core::domain::platform_config::{
    BillingMode, ClawsterConfigManifest, StorageBackendKind, CONFIG_PATH_ENV,
};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./clawster-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ClawsterConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./clawster-config.yaml");
        println!("  4. ~/.clawster/config.yaml");
        println!("  5. /etc/clawster/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!();

    println!("{}", "Provisioning:".bold());
    println!("  Endpoint: {}", spec.provisioning.endpoint);
    println!("  Image: {}", spec.provisioning.image);
    println!("  Name prefix: {}", spec.provisioning.name_prefix);
    println!(
        "  API key: {}",
        if spec.provisioning.api_key.is_some() { "configured" } else { "(none)" }
    );
    println!();

    println!("{}", "Lifecycle:".bold());
    println!("  Default model: {}", spec.lifecycle.default_model);
    println!("  Liveness timeout: {}ms", spec.lifecycle.liveness_timeout_ms);
    println!("  Boot timeout: {}s", spec.lifecycle.boot_timeout_secs);
    println!();

    println!("{}", "Billing:".bold());
    match spec.billing.mode {
        BillingMode::Bypass => println!("  Mode: {}", "bypass".yellow()),
        BillingMode::Stripe => {
            println!("  Mode: stripe");
            if let Some(stripe) = &spec.billing.stripe {
                for size in InstanceSize::ALL {
                    println!(
                        "    {} → {}",
                        size,
                        stripe.price_for(size).unwrap_or("(no price)")
                    );
                }
            }
        }
    }
    println!();

    println!("{}", "Metering:".bold());
    println!("  Enabled: {}", spec.metering.enabled);
    println!("  Interval: {}s", spec.metering.interval_secs);
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackendKind::Memory => println!("  Backend: memory"),
        StorageBackendKind::Postgres => {
            println!("  Backend: postgres (max {} connections)", spec.storage.max_connections)
        }
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ClawsterConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    let sample = ClawsterConfigManifest::default().to_yaml_string()?;

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
