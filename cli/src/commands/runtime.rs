// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Builds the orchestrator service from a loaded configuration.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use clawster_core::application::repository_factory::create_repositories;
use clawster_core::application::{Collaborators, OrchestratorSettings, StandardBotLifecycleService};
use clawster_core::domain::billing::BillingProvider;
use clawster_core::domain::platform_config::{BillingMode, ClawsterConfigManifest};
use clawster_core::infrastructure::phala::PhalaClient;
use clawster_core::infrastructure::probe::HttpLivenessProbe;
use clawster_core::infrastructure::stripe::StripeBilling;
use clawster_core::infrastructure::EventBus;

/// Load and validate the configuration (explicit path, discovery, then defaults).
pub fn load_config(config_path: Option<PathBuf>) -> Result<ClawsterConfigManifest> {
    let config = ClawsterConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

pub async fn build_service(config: &ClawsterConfigManifest) -> Result<StandardBotLifecycleService> {
    let spec = &config.spec;

    let provider = Arc::new(
        PhalaClient::from_config(&spec.provisioning).context("Failed to initialize provisioning client")?,
    );
    let probe = Arc::new(
        HttpLivenessProbe::new(spec.lifecycle.liveness_timeout()).context("Failed to initialize liveness probe")?,
    );

    let billing: Option<Arc<dyn BillingProvider>> = match spec.billing.mode {
        BillingMode::Bypass => {
            info!("Billing bypass enabled; bots deploy without payment");
            None
        }
        BillingMode::Stripe => {
            let stripe = spec
                .billing
                .stripe
                .as_ref()
                .context("billing.stripe is required when billing.mode is 'stripe'")?;
            Some(Arc::new(StripeBilling::new(stripe).context("Failed to initialize Stripe billing")?))
        }
    };

    let repositories = create_repositories(&config.storage_backend()?).await?;

    Ok(StandardBotLifecycleService::new(
        Collaborators {
            bots: repositories.bots,
            usage: repositories.usage,
            provider,
            probe,
            billing,
            event_bus: EventBus::with_default_capacity(),
        },
        OrchestratorSettings::from_config(spec),
    ))
}
