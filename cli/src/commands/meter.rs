// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `clawster meter`: one metering cycle, for cron-style deployments.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use super::runtime::{build_service, load_config};

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(&config).await?;

    let report = service
        .usage_meter()
        .run_once()
        .await
        .context("Metering cycle failed")?;

    println!("{}", "Metering cycle complete".green());
    println!("  Recorded:   {}", report.recorded);
    println!("  Duplicates: {}", report.duplicates);
    println!("  Stopped:    {}", report.stopped);
    println!("  Errored:    {}", report.errored);
    if report.skipped > 0 {
        println!("  Skipped:    {}", report.skipped.to_string().yellow());
    }

    Ok(())
}
