// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bot Lifecycle Service
//!
//! Owner-scoped operations exposed to the API: spawn, status, list, restart,
//! terminate, attestation, logs and usage. A bot owned by someone else is
//! reported as not found.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Entry point composing deployment, reconciliation,
//!   termination, billing and metering

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::billing_flow::{BillingWebhookHandler, WebhookOutcome};
use crate::application::deployment::DeploymentService;
use crate::application::error::OrchestratorError;
use crate::application::locks::BotLockRegistry;
use crate::application::provisioner::EnclaveProvisioner;
use crate::application::reconciler::StatusReconciler;
use crate::application::termination::TerminationCoordinator;
use crate::application::usage_meter::{UsageMeter, UsageMeterConfig};
use crate::domain::billing::{BillingProvider, CheckoutRequest};
use crate::domain::bot::{
    Bot, BotId, BotName, BotStatus, InstanceSize, OwnerId, PendingSecrets, DEFAULT_MODEL,
};
use crate::domain::events::BotLifecycleEvent;
use crate::domain::platform_config::{ClawsterConfigSpec, DEFAULT_IMAGE};
use crate::domain::provisioning::{LivenessProbe, ProvisioningProvider};
use crate::domain::repository::{BotRepository, UsageRepository};
use crate::domain::secrets::{filter_secret_lines, validate_secrets};
use crate::infrastructure::event_bus::EventBus;

pub const DEFAULT_LOG_TAIL: u32 = 100;
pub const MAX_LOG_TAIL: u32 = 500;
/// Hours used to project an hourly burn onto a month
pub const HOURS_PER_MONTH: f64 = 720.0;

const TEE_PLATFORM: &str = "Intel TDX (via Phala Network / dstack)";
const ENVELOPE_ALGORITHM: &str = "x25519 + AES-256-GCM";
const TRUST_CENTER_BASE: &str = "https://trust.phala.com/verify";

/// External collaborators the service is assembled from
#[derive(Clone)]
pub struct Collaborators {
    pub bots: Arc<dyn BotRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub provider: Arc<dyn ProvisioningProvider>,
    pub probe: Arc<dyn LivenessProbe>,
    /// `None` runs in bypass mode: spawns deploy immediately
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub event_bus: EventBus,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub image: String,
    pub name_prefix: String,
    pub default_model: String,
    pub boot_timeout: chrono::Duration,
    pub metering: UsageMeterConfig,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            name_prefix: "clawster".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            boot_timeout: chrono::Duration::seconds(900),
            metering: UsageMeterConfig::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(spec: &ClawsterConfigSpec) -> Self {
        Self {
            image: spec.provisioning.image.clone(),
            name_prefix: spec.provisioning.name_prefix.clone(),
            default_model: spec.lifecycle.default_model.clone(),
            boot_timeout: spec.lifecycle.boot_timeout(),
            metering: UsageMeterConfig {
                enabled: spec.metering.enabled,
                interval: std::time::Duration::from_secs(spec.metering.interval_secs),
            },
        }
    }
}

/// Spawn request body. Secrets are held only until the enclave receives them.
#[derive(Clone, Deserialize)]
pub struct SpawnRequest {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    pub telegram_token: String,
    pub api_key: String,
    pub owner_id: String,
    /// Personality text
    #[serde(default)]
    pub soul: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub custom_env: BTreeMap<String, String>,
}

impl SpawnRequest {
    fn into_secrets(self) -> (String, Option<String>, Option<String>, PendingSecrets) {
        let secrets = PendingSecrets {
            bot_token: self.telegram_token,
            api_key: self.api_key,
            owner_id: self.owner_id,
            personality: self.soul,
            config: self.config,
            custom: self.custom_env,
        };
        (self.name, self.model, self.size, secrets)
    }
}

impl std::fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("size", &self.size)
            .field("custom_keys", &self.custom_env.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Public representation of a bot. Never carries staged secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotView {
    pub id: BotId,
    pub name: String,
    pub model: String,
    pub size: InstanceSize,
    pub status: BotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    pub app_id: Option<String>,
    pub instance_id: Option<String>,
    pub endpoint: Option<String>,
    pub enclave_public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
}

impl From<&Bot> for BotView {
    fn from(bot: &Bot) -> Self {
        Self {
            id: bot.id,
            name: bot.name.to_string(),
            model: bot.model.clone(),
            size: bot.size,
            status: bot.status,
            status_detail: bot.status_detail.clone(),
            app_id: bot.app_id.clone(),
            instance_id: bot.instance_id.as_ref().map(|id| id.as_str().to_string()),
            endpoint: bot.endpoint.clone(),
            enclave_public_key: bot.enclave_public_key.clone(),
            created_at: bot.created_at,
            updated_at: bot.updated_at,
            terminated_at: bot.terminated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpawnedBot {
    #[serde(flatten)]
    pub bot: BotView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttestationReport {
    pub bot_id: BotId,
    pub bot_name: String,
    pub tee_platform: String,
    pub algorithm: String,
    pub enclave_public_key: Option<String>,
    pub app_id: Option<String>,
    pub instance_id: Option<String>,
    pub endpoint: Option<String>,
    pub trust_center_url: Option<String>,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tee_quote: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogsView {
    pub bot_id: BotId,
    pub tail: u32,
    pub logs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub running_bots: usize,
    pub hourly_burn_usd: f64,
    pub month_start: DateTime<Utc>,
    pub month_hours: f64,
    pub month_cost_usd: f64,
    pub estimated_monthly_usd: f64,
}

#[async_trait]
pub trait BotLifecycleService: Send + Sync {
    async fn spawn(&self, owner: &OwnerId, request: SpawnRequest) -> Result<SpawnedBot, OrchestratorError>;

    /// Reconciles with the provider before answering
    async fn get_status(&self, owner: &OwnerId, id: BotId) -> Result<BotView, OrchestratorError>;

    /// Non-terminated bots, newest first
    async fn list(&self, owner: &OwnerId) -> Result<Vec<BotView>, OrchestratorError>;

    async fn restart(&self, owner: &OwnerId, id: BotId) -> Result<BotView, OrchestratorError>;

    async fn terminate(&self, owner: &OwnerId, id: BotId) -> Result<BotView, OrchestratorError>;

    async fn attestation(&self, owner: &OwnerId, id: BotId) -> Result<AttestationReport, OrchestratorError>;

    async fn logs(&self, owner: &OwnerId, id: BotId, tail: Option<u32>) -> Result<LogsView, OrchestratorError>;

    async fn usage_summary(&self, owner: &OwnerId) -> Result<UsageSummary, OrchestratorError>;

    /// Process a billing webhook delivery. Not found in bypass mode.
    async fn billing_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, OrchestratorError>;
}

pub struct StandardBotLifecycleService {
    bots: Arc<dyn BotRepository>,
    usage: Arc<dyn UsageRepository>,
    provider: Arc<dyn ProvisioningProvider>,
    billing: Option<Arc<dyn BillingProvider>>,
    webhook: Option<BillingWebhookHandler>,
    deployment: DeploymentService,
    reconciler: StatusReconciler,
    termination: TerminationCoordinator,
    meter: Arc<UsageMeter>,
    locks: BotLockRegistry,
    event_bus: EventBus,
    settings: OrchestratorSettings,
}

impl StandardBotLifecycleService {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        let Collaborators {
            bots,
            usage,
            provider,
            probe,
            billing,
            event_bus,
        } = collaborators;
        let locks = BotLockRegistry::new();

        let provisioner = Arc::new(EnclaveProvisioner::new(
            provider.clone(),
            settings.image.clone(),
            settings.name_prefix.clone(),
        ));
        let deployment = DeploymentService::new(bots.clone(), provisioner, locks.clone(), event_bus.clone());
        let reconciler = StatusReconciler::new(
            bots.clone(),
            provider.clone(),
            probe,
            locks.clone(),
            event_bus.clone(),
            settings.boot_timeout,
        );
        let termination =
            TerminationCoordinator::new(bots.clone(), provider.clone(), locks.clone(), event_bus.clone());
        let webhook = billing.as_ref().map(|billing| {
            BillingWebhookHandler::new(billing.clone(), bots.clone(), deployment.clone(), termination.clone())
        });
        let meter = Arc::new(UsageMeter::new(
            bots.clone(),
            usage.clone(),
            provider.clone(),
            locks.clone(),
            event_bus.clone(),
            settings.metering.clone(),
        ));

        Self {
            bots,
            usage,
            provider,
            billing,
            webhook,
            deployment,
            reconciler,
            termination,
            meter,
            locks,
            event_bus,
            settings,
        }
    }

    /// The background meter sharing this service's repositories and locks
    pub fn usage_meter(&self) -> Arc<UsageMeter> {
        self.meter.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn billing_enabled(&self) -> bool {
        self.billing.is_some()
    }

    async fn owned(&self, owner: &OwnerId, id: BotId) -> Result<Bot, OrchestratorError> {
        match self.bots.find_by_id(id).await? {
            Some(bot) if &bot.owner == owner => Ok(bot),
            _ => Err(OrchestratorError::NotFound(id.to_string())),
        }
    }

    async fn open_checkout(
        &self,
        billing: &Arc<dyn BillingProvider>,
        bot: Bot,
    ) -> Result<SpawnedBot, OrchestratorError> {
        let request = CheckoutRequest {
            bot_id: bot.id,
            owner: bot.owner.clone(),
            size: bot.size,
        };

        match billing.create_checkout(&request).await {
            Ok(session) => {
                info!(bot_id = %bot.id, session_id = %session.id, "Checkout session created");
                Ok(SpawnedBot {
                    bot: BotView::from(&bot),
                    checkout_url: Some(session.url),
                })
            }
            Err(e) => {
                warn!(bot_id = %bot.id, error = %e, "Could not create checkout session");
                let _guard = self.locks.acquire(bot.id).await;
                let mut bot = bot;
                bot.mark_error(format!("checkout session could not be created: {}", e));
                self.bots.save(&bot).await?;
                self.event_bus.publish(BotLifecycleEvent::StatusChanged {
                    bot_id: bot.id,
                    from: BotStatus::PendingPayment,
                    to: BotStatus::Error,
                    changed_at: Utc::now(),
                });
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl BotLifecycleService for StandardBotLifecycleService {
    async fn spawn(&self, owner: &OwnerId, request: SpawnRequest) -> Result<SpawnedBot, OrchestratorError> {
        let (name, model, size, secrets) = request.into_secrets();

        let name = BotName::parse(&name)?;
        let size = match size.as_deref() {
            Some(size) => size.parse::<InstanceSize>()?,
            None => InstanceSize::default(),
        };
        validate_secrets(&secrets)?;
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_model.clone());

        if self
            .bots
            .find_active_by_owner_and_name(owner, name.as_str())
            .await?
            .is_some()
        {
            return Err(OrchestratorError::Conflict(format!(
                "a bot named '{}' already exists",
                name
            )));
        }
        for previous in self
            .bots
            .find_terminated_by_owner_and_name(owner, name.as_str())
            .await?
        {
            info!(bot_id = %previous.id, name = %name, "Removing terminated bot to reuse its name");
            self.bots.delete(previous.id).await?;
        }

        let bot = Bot::stage(owner.clone(), name, model, size, secrets, self.billing.is_some());
        self.bots.insert(&bot).await?;
        info!(bot_id = %bot.id, owner = %owner, status = %bot.status, size = %size, "Bot staged");
        self.event_bus.publish(BotLifecycleEvent::BotStaged {
            bot_id: bot.id,
            owner: owner.clone(),
            status: bot.status,
            staged_at: bot.created_at,
        });

        match &self.billing {
            Some(billing) => self.open_checkout(billing, bot).await,
            None => {
                let report = self.deployment.deploy(bot.id).await?;
                Ok(SpawnedBot {
                    bot: BotView::from(&report.bot),
                    checkout_url: None,
                })
            }
        }
    }

    async fn get_status(&self, owner: &OwnerId, id: BotId) -> Result<BotView, OrchestratorError> {
        self.owned(owner, id).await?;
        let bot = self.reconciler.reconcile(id).await?;
        Ok(BotView::from(&bot))
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<BotView>, OrchestratorError> {
        let mut bots: Vec<Bot> = self
            .bots
            .list_by_owner(owner)
            .await?
            .into_iter()
            .filter(|bot| !bot.status.is_terminal())
            .collect();
        bots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bots.iter().map(BotView::from).collect())
    }

    async fn restart(&self, owner: &OwnerId, id: BotId) -> Result<BotView, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let mut bot = self.owned(owner, id).await?;

        if bot.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!("bot {} is terminated", id)));
        }

        let Some(instance_id) = bot.instance_id.clone() else {
            if bot.status == BotStatus::PendingPayment {
                return Err(OrchestratorError::PaymentRequired(format!(
                    "bot {} is waiting for payment",
                    id
                )));
            }
            if bot.has_pending_secrets() {
                let report = self.deployment.deploy_locked(bot).await?;
                return Ok(BotView::from(&report.bot));
            }
            return Err(OrchestratorError::Validation(format!(
                "bot {} has no instance and no staged secrets; spawn it again",
                id
            )));
        };

        self.provider.restart(&instance_id).await?;

        let previous = bot.status;
        let now = Utc::now();
        bot.mark_restarted(now);
        self.bots.save(&bot).await?;
        info!(bot_id = %id, instance_id = %instance_id, "Bot restarted");
        if previous != bot.status {
            self.event_bus.publish(BotLifecycleEvent::StatusChanged {
                bot_id: id,
                from: previous,
                to: bot.status,
                changed_at: now,
            });
        }

        Ok(BotView::from(&bot))
    }

    async fn terminate(&self, owner: &OwnerId, id: BotId) -> Result<BotView, OrchestratorError> {
        self.owned(owner, id).await?;
        let bot = self.termination.terminate(id).await?;
        self.locks.forget(id);
        Ok(BotView::from(&bot))
    }

    async fn attestation(&self, owner: &OwnerId, id: BotId) -> Result<AttestationReport, OrchestratorError> {
        let bot = self.owned(owner, id).await?;

        let tee_quote = match (&bot.instance_id, bot.status) {
            (Some(instance_id), BotStatus::Running) => {
                match self.provider.attestation(instance_id).await {
                    Ok(quote) => Some(quote),
                    Err(e) => {
                        warn!(bot_id = %id, instance_id = %instance_id, error = %e, "TEE quote unavailable");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(AttestationReport {
            bot_id: bot.id,
            bot_name: bot.name.to_string(),
            tee_platform: TEE_PLATFORM.to_string(),
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            enclave_public_key: bot.enclave_public_key.clone(),
            app_id: bot.app_id.clone(),
            instance_id: bot.instance_id.as_ref().map(|id| id.as_str().to_string()),
            endpoint: bot.endpoint.clone(),
            trust_center_url: bot
                .app_id
                .as_ref()
                .map(|app_id| format!("{}/{}", TRUST_CENTER_BASE, app_id)),
            image: self.settings.image.clone(),
            tee_quote,
        })
    }

    async fn logs(&self, owner: &OwnerId, id: BotId, tail: Option<u32>) -> Result<LogsView, OrchestratorError> {
        let bot = self.owned(owner, id).await?;
        let Some(instance_id) = bot.instance_id else {
            return Err(OrchestratorError::Conflict(format!("bot {} has no instance yet", id)));
        };

        let tail = tail.unwrap_or(DEFAULT_LOG_TAIL).clamp(1, MAX_LOG_TAIL);
        let raw = self.provider.logs(&instance_id, tail).await?;

        Ok(LogsView {
            bot_id: id,
            tail,
            logs: filter_secret_lines(&raw),
        })
    }

    async fn usage_summary(&self, owner: &OwnerId) -> Result<UsageSummary, OrchestratorError> {
        let now = Utc::now();
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now);

        let running: Vec<Bot> = self
            .bots
            .list_by_owner(owner)
            .await?
            .into_iter()
            .filter(|bot| bot.status == BotStatus::Running)
            .collect();
        let hourly_burn_usd: f64 = running.iter().map(|bot| bot.size.spec().retail_per_hour).sum();

        let records = self.usage.list_for_owner_since(owner, month_start).await?;
        let month_hours = records.iter().map(|r| r.hours).sum();
        let month_cost_usd = records.iter().map(|r| r.cost_usd).sum();

        Ok(UsageSummary {
            running_bots: running.len(),
            hourly_burn_usd,
            month_start,
            month_hours,
            month_cost_usd,
            estimated_monthly_usd: hourly_burn_usd * HOURS_PER_MONTH,
        })
    }

    async fn billing_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, OrchestratorError> {
        match &self.webhook {
            Some(handler) => handler.handle(payload, signature_header).await,
            None => Err(OrchestratorError::NotFound("billing webhooks are not enabled".to_string())),
        }
    }
}
