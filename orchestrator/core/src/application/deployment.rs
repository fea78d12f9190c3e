// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deployment Service - staged secrets → running enclave
//!
//! The single path from a record with staged secrets to a committed enclave,
//! used by direct spawns, restarts of never-deployed bots and payment
//! webhooks alike.
//!
//! Remote and crypto failures never escape [`DeploymentService::deploy`] as
//! errors: they are recorded on the bot (`error` + detail) after a
//! best-effort delete of anything the attempt left behind, and reported as
//! [`DeploymentOutcome::Failed`]. Leftovers the provider would not delete
//! stay on the record for termination to retry. Only missing bots, missing secrets and
//! persistence failures are returned as `Err`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Deploy orchestration with rollback of partial remote state

use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::error::OrchestratorError;
use crate::application::locks::BotLockRegistry;
use crate::application::provisioner::{EnclaveProvisioner, SpawnFailure};
use crate::domain::bot::{Bot, BotId, BotStatus};
use crate::domain::events::BotLifecycleEvent;
use crate::domain::provisioning::InstanceId;
use crate::domain::repository::BotRepository;
use crate::domain::secrets::assemble_env;
use crate::infrastructure::crypto::EncryptionError;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentOutcome {
    Deployed {
        app_id: String,
        instance_id: InstanceId,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DeploymentReport {
    /// The bot as persisted after the attempt
    pub bot: Bot,
    pub outcome: DeploymentOutcome,
}

impl DeploymentReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, DeploymentOutcome::Deployed { .. })
    }
}

#[derive(Clone)]
pub struct DeploymentService {
    bots: Arc<dyn BotRepository>,
    provisioner: Arc<EnclaveProvisioner>,
    locks: BotLockRegistry,
    event_bus: EventBus,
}

impl DeploymentService {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        provisioner: Arc<EnclaveProvisioner>,
        locks: BotLockRegistry,
        event_bus: EventBus,
    ) -> Self {
        Self {
            bots,
            provisioner,
            locks,
            event_bus,
        }
    }

    pub async fn deploy(&self, id: BotId) -> Result<DeploymentReport, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let bot = self.load(id).await?;
        self.deploy_locked(bot).await
    }

    /// Deploy only if the bot is still in `expected` once the lock is held.
    /// Returns `None` when the status has already moved on.
    pub async fn deploy_when(
        &self,
        id: BotId,
        expected: BotStatus,
    ) -> Result<Option<DeploymentReport>, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let bot = self.load(id).await?;

        if bot.status != expected {
            info!(
                bot_id = %id,
                status = %bot.status,
                expected = %expected,
                "Skipping deploy, bot status already moved on"
            );
            return Ok(None);
        }

        self.deploy_locked(bot).await.map(Some)
    }

    /// Caller must hold the bot's lock.
    pub(crate) async fn deploy_locked(&self, mut bot: Bot) -> Result<DeploymentReport, OrchestratorError> {
        if bot.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!("bot {} is terminated", bot.id)));
        }
        let Some(secrets) = bot.pending_secrets.clone() else {
            return Err(OrchestratorError::Validation(format!(
                "bot {} has no staged secrets to deploy",
                bot.id
            )));
        };

        let previous = bot.status;
        bot.begin_provisioning();
        self.bots.save(&bot).await?;
        if previous != BotStatus::Provisioning {
            self.publish_status_change(bot.id, previous, BotStatus::Provisioning);
        }

        info!(bot_id = %bot.id, name = %bot.name, size = %bot.size, "Deploying bot");

        let spawned = match assemble_env(&bot.model, &secrets) {
            Ok(env) => {
                self.provisioner
                    .spawn(bot.id, &bot.name, bot.size, &env)
                    .await
            }
            Err(e) => Err(SpawnFailure::clean(EncryptionError::Serialization(e.to_string()))),
        };
        drop(secrets);

        match spawned {
            Ok(enclave) => {
                let app_id = enclave.app_id.clone();
                let instance_id = enclave.instance.instance_id.clone();
                let now = Utc::now();
                bot.record_deployment(
                    enclave.app_id,
                    enclave.instance.instance_id,
                    enclave.enclave_public_key,
                    now,
                );

                if let Err(e) = self.bots.save(&bot).await {
                    error!(
                        bot_id = %bot.id,
                        instance_id = %instance_id,
                        error = %e,
                        "Could not persist deployment, removing the new enclave"
                    );
                    if !self.cleanup(bot.id, &[instance_id.as_str().to_string(), app_id]).await {
                        error!(
                            bot_id = %bot.id,
                            instance_id = %instance_id,
                            "Enclave left running without a record; delete it by hand"
                        );
                    }
                    counter!("clawster_deployments_total", "outcome" => "failed").increment(1);
                    return Err(e.into());
                }

                counter!("clawster_deployments_total", "outcome" => "deployed").increment(1);
                info!(bot_id = %bot.id, app_id = %app_id, instance_id = %instance_id, "Bot deployed");

                self.event_bus.publish(BotLifecycleEvent::BotDeployed {
                    bot_id: bot.id,
                    app_id: app_id.clone(),
                    instance_id: instance_id.clone(),
                    deployed_at: now,
                });
                self.publish_status_change(bot.id, BotStatus::Provisioning, BotStatus::Starting);

                Ok(DeploymentReport {
                    bot,
                    outcome: DeploymentOutcome::Deployed { app_id, instance_id },
                })
            }
            Err(failure) => {
                let reason = failure.error.to_string();
                warn!(bot_id = %bot.id, error = %reason, "Deployment failed");

                if self.cleanup(bot.id, &failure.orphans()).await {
                    bot.mark_error(reason.clone());
                } else {
                    // Keep the ids so a later terminate retries the delete
                    bot.mark_error_with_orphans(failure.app_id, failure.instance_id, reason.clone());
                }
                self.bots.save(&bot).await?;
                counter!("clawster_deployments_total", "outcome" => "failed").increment(1);

                self.event_bus.publish(BotLifecycleEvent::DeploymentFailed {
                    bot_id: bot.id,
                    reason: reason.clone(),
                    failed_at: Utc::now(),
                });
                self.publish_status_change(bot.id, BotStatus::Provisioning, BotStatus::Error);

                Ok(DeploymentReport {
                    bot,
                    outcome: DeploymentOutcome::Failed { reason },
                })
            }
        }
    }

    /// Best-effort delete of remote leftovers. The first id the provider
    /// confirms is enough. Returns whether nothing is left behind.
    async fn cleanup(&self, bot_id: BotId, orphans: &[String]) -> bool {
        if orphans.is_empty() {
            return true;
        }
        for external_id in orphans {
            match self.provisioner.provider().delete(external_id).await {
                Ok(outcome) => {
                    info!(bot_id = %bot_id, external_id = %external_id, ?outcome, "Removed orphaned enclave");
                    return true;
                }
                Err(e) if e.is_not_found() => return true,
                Err(e) => {
                    warn!(
                        bot_id = %bot_id,
                        external_id = %external_id,
                        error = %e,
                        "Failed to remove orphaned enclave"
                    );
                }
            }
        }
        false
    }

    async fn load(&self, id: BotId) -> Result<Bot, OrchestratorError> {
        self.bots
            .find_by_id(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    fn publish_status_change(&self, bot_id: BotId, from: BotStatus, to: BotStatus) {
        self.event_bus.publish(BotLifecycleEvent::StatusChanged {
            bot_id,
            from,
            to,
            changed_at: Utc::now(),
        });
    }
}
