// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Status Reconciler
//!
//! Folds the provider's view of an instance into the bot's lifecycle status
//! on read. Remote `running` is only trusted for a bot that was already
//! running; a bot coming up must also pass its own liveness probe, and sits
//! in `booting` until it does (bounded by the boot timeout).
//!
//! Reconciliation is best-effort: transient provider errors leave the stored
//! status alone, and a bot whose lock is held elsewhere is returned as
//! stored.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::error::OrchestratorError;
use crate::application::locks::BotLockRegistry;
use crate::domain::bot::{Bot, BotId, BotStatus};
use crate::domain::events::BotLifecycleEvent;
use crate::domain::provisioning::{LivenessProbe, ProvisioningProvider, RemoteStatus};
use crate::domain::repository::BotRepository;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Updated,
    Unchanged,
    Busy,
    Error,
}

impl ReconcileResult {
    fn as_str(&self) -> &'static str {
        match self {
            ReconcileResult::Updated => "updated",
            ReconcileResult::Unchanged => "unchanged",
            ReconcileResult::Busy => "busy",
            ReconcileResult::Error => "error",
        }
    }
}

#[derive(Clone)]
pub struct StatusReconciler {
    bots: Arc<dyn BotRepository>,
    provider: Arc<dyn ProvisioningProvider>,
    probe: Arc<dyn LivenessProbe>,
    locks: BotLockRegistry,
    event_bus: EventBus,
    boot_timeout: Duration,
}

impl StatusReconciler {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        provider: Arc<dyn ProvisioningProvider>,
        probe: Arc<dyn LivenessProbe>,
        locks: BotLockRegistry,
        event_bus: EventBus,
        boot_timeout: Duration,
    ) -> Self {
        Self {
            bots,
            provider,
            probe,
            locks,
            event_bus,
            boot_timeout,
        }
    }

    /// Reconcile one bot and return it as it now stands.
    pub async fn reconcile(&self, id: BotId) -> Result<Bot, OrchestratorError> {
        let Some(_guard) = self.locks.try_acquire(id) else {
            debug!(bot_id = %id, "Bot busy, serving stored status");
            counter!("clawster_reconciliations_total", "result" => ReconcileResult::Busy.as_str())
                .increment(1);
            return self.load(id).await;
        };

        let mut bot = self.load(id).await?;
        let result = self.reconcile_locked(&mut bot, Utc::now()).await?;
        counter!("clawster_reconciliations_total", "result" => result.as_str()).increment(1);
        Ok(bot)
    }

    /// Caller must hold the bot's lock. Persists any change.
    pub(crate) async fn reconcile_locked(
        &self,
        bot: &mut Bot,
        now: DateTime<Utc>,
    ) -> Result<ReconcileResult, OrchestratorError> {
        if !bot.status.is_reconcilable() {
            return Ok(ReconcileResult::Unchanged);
        }
        let Some(instance_id) = bot.instance_id.clone() else {
            return Ok(ReconcileResult::Unchanged);
        };

        let previous = bot.status;
        let mut changed = false;

        let target = match self.provider.get_status(&instance_id).await {
            Ok(state) => {
                if let Some(endpoint) = state.primary_endpoint() {
                    if bot.observe_endpoint(endpoint) {
                        debug!(bot_id = %bot.id, endpoint = %endpoint, "Observed new endpoint");
                        changed = true;
                    }
                }
                self.map_remote(bot, &state.status).await
            }
            Err(e) if e.is_not_found() => {
                info!(bot_id = %bot.id, instance_id = %instance_id, "Instance no longer exists remotely");
                Some(BotStatus::Stopped)
            }
            Err(e) => {
                warn!(
                    bot_id = %bot.id,
                    instance_id = %instance_id,
                    error = %e,
                    "Status reconciliation failed, keeping stored status"
                );
                if changed {
                    self.bots.save(bot).await?;
                }
                return Ok(ReconcileResult::Error);
            }
        };

        match target {
            Some(BotStatus::Booting) if bot.boot_deadline_passed(now, self.boot_timeout) => {
                let detail = format!(
                    "enclave did not pass its health check within {} seconds",
                    self.boot_timeout.num_seconds()
                );
                warn!(bot_id = %bot.id, "Boot timeout exceeded");
                bot.mark_error(detail);
                changed = true;
            }
            Some(BotStatus::Error) if previous != BotStatus::Error => {
                bot.mark_error(format!("provider reported instance {} as failed", instance_id));
                changed = true;
            }
            Some(status) => {
                changed |= bot.apply_status(status);
            }
            None => {}
        }

        if !changed {
            return Ok(ReconcileResult::Unchanged);
        }

        self.bots.save(bot).await?;
        if bot.status != previous {
            info!(bot_id = %bot.id, from = %previous, to = %bot.status, "Bot status reconciled");
            self.event_bus.publish(BotLifecycleEvent::StatusChanged {
                bot_id: bot.id,
                from: previous,
                to: bot.status,
                changed_at: now,
            });
        }
        Ok(ReconcileResult::Updated)
    }

    async fn map_remote(&self, bot: &Bot, remote: &RemoteStatus) -> Option<BotStatus> {
        match remote {
            RemoteStatus::Running if bot.status == BotStatus::Running => Some(BotStatus::Running),
            RemoteStatus::Running => {
                let live = match bot.endpoint.as_deref() {
                    Some(endpoint) => self.probe.is_live(endpoint).await,
                    None => false,
                };
                Some(if live { BotStatus::Running } else { BotStatus::Booting })
            }
            RemoteStatus::Starting => Some(BotStatus::Provisioning),
            RemoteStatus::Stopped => Some(BotStatus::Stopped),
            RemoteStatus::Failed => Some(BotStatus::Error),
            RemoteStatus::Other(status) => {
                debug!(bot_id = %bot.id, remote_status = %status, "Unmapped remote status");
                None
            }
        }
    }

    async fn load(&self, id: BotId) -> Result<Bot, OrchestratorError> {
        self.bots
            .find_by_id(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }
}
