// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Termination Coordinator
//!
//! A bot is only marked `terminated` once the provider has confirmed that
//! its remote resource is gone (deleted, or already absent) or when no remote
//! identifier was ever assigned. If no delete can be confirmed the previous
//! status is put back and the caller gets `TerminationFailed`.

use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::error::OrchestratorError;
use crate::application::locks::BotLockRegistry;
use crate::domain::bot::{Bot, BotId, BotStatus};
use crate::domain::events::BotLifecycleEvent;
use crate::domain::provisioning::{DeleteOutcome, ProvisioningError, ProvisioningProvider};
use crate::domain::repository::BotRepository;
use crate::infrastructure::event_bus::EventBus;

#[derive(Clone)]
pub struct TerminationCoordinator {
    bots: Arc<dyn BotRepository>,
    provider: Arc<dyn ProvisioningProvider>,
    locks: BotLockRegistry,
    event_bus: EventBus,
}

impl TerminationCoordinator {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        provider: Arc<dyn ProvisioningProvider>,
        locks: BotLockRegistry,
        event_bus: EventBus,
    ) -> Self {
        Self {
            bots,
            provider,
            locks,
            event_bus,
        }
    }

    pub async fn terminate(&self, id: BotId) -> Result<Bot, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let bot = self
            .bots
            .find_by_id(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        self.terminate_locked(bot).await
    }

    /// Caller must hold the bot's lock.
    pub(crate) async fn terminate_locked(&self, mut bot: Bot) -> Result<Bot, OrchestratorError> {
        if bot.status.is_terminal() {
            counter!("clawster_terminations_total", "outcome" => "noop").increment(1);
            return Ok(bot);
        }

        let external_ids = bot.external_ids();
        let prior_status = bot.status;
        let prior_detail = bot.status_detail.clone();

        if !external_ids.is_empty() {
            if bot.apply_status(BotStatus::Terminating) {
                self.bots.save(&bot).await?;
            }

            if let Err(last_error) = self.delete_any(&bot, &external_ids).await {
                bot.restore_status(prior_status, prior_detail);
                self.bots.save(&bot).await?;
                counter!("clawster_terminations_total", "outcome" => "failed").increment(1);
                return Err(OrchestratorError::TerminationFailed(format!(
                    "could not confirm deletion of {}: {}",
                    external_ids.join(", "),
                    last_error
                )));
            }
        }

        let now = Utc::now();
        bot.mark_terminated(now);
        self.bots.save(&bot).await?;
        counter!("clawster_terminations_total", "outcome" => "terminated").increment(1);
        info!(bot_id = %bot.id, from = %prior_status, "Bot terminated");

        self.event_bus.publish(BotLifecycleEvent::StatusChanged {
            bot_id: bot.id,
            from: prior_status,
            to: BotStatus::Terminated,
            changed_at: now,
        });
        self.event_bus.publish(BotLifecycleEvent::BotTerminated {
            bot_id: bot.id,
            terminated_at: now,
        });

        Ok(bot)
    }

    /// Try each id in order; the first confirmed deletion wins.
    async fn delete_any(&self, bot: &Bot, external_ids: &[String]) -> Result<(), ProvisioningError> {
        let mut last_error = ProvisioningError::Rejected("no delete attempted".to_string());

        for external_id in external_ids {
            match self.provider.delete(external_id).await {
                Ok(DeleteOutcome::Deleted) => {
                    info!(bot_id = %bot.id, external_id = %external_id, "Remote resource deleted");
                    return Ok(());
                }
                Ok(DeleteOutcome::AlreadyGone) => {
                    info!(bot_id = %bot.id, external_id = %external_id, "Remote resource already gone");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    info!(bot_id = %bot.id, external_id = %external_id, "Remote resource already gone");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        bot_id = %bot.id,
                        external_id = %external_id,
                        error = %e,
                        "Delete attempt failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
