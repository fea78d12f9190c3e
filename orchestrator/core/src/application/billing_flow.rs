// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Billing webhook handling.
//!
//! Deliveries are at-least-once. A payment completion deploys only while the
//! bot is still `pending_payment`, checked under the bot's lock, so replays
//! and concurrent duplicates deploy once. Errors that the provider should
//! retry (persistence, termination) are returned to the caller.

use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::deployment::{DeploymentOutcome, DeploymentService};
use crate::application::error::OrchestratorError;
use crate::application::termination::TerminationCoordinator;
use crate::domain::billing::{BillingEvent, BillingProvider};
use crate::domain::bot::{BotId, BotStatus};
use crate::domain::repository::BotRepository;

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Deployed { bot_id: BotId },
    /// The bot had already left the state this event acts on
    AlreadyHandled { bot_id: BotId },
    DeploymentFailed { bot_id: BotId, reason: String },
    Terminated { bot_id: BotId },
    /// Unknown event type or unknown bot
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Deployed { .. } => "deployed",
            WebhookOutcome::AlreadyHandled { .. } => "already_handled",
            WebhookOutcome::DeploymentFailed { .. } => "deployment_failed",
            WebhookOutcome::Terminated { .. } => "terminated",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

pub struct BillingWebhookHandler {
    provider: Arc<dyn BillingProvider>,
    bots: Arc<dyn BotRepository>,
    deployment: DeploymentService,
    termination: TerminationCoordinator,
}

impl BillingWebhookHandler {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        bots: Arc<dyn BotRepository>,
        deployment: DeploymentService,
        termination: TerminationCoordinator,
    ) -> Self {
        Self {
            provider,
            bots,
            deployment,
            termination,
        }
    }

    pub fn provider(&self) -> &Arc<dyn BillingProvider> {
        &self.provider
    }

    /// Verify, decode and act on one webhook delivery.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, OrchestratorError> {
        match self.provider.parse_webhook(payload, signature_header)? {
            Some(event) => self.apply(event).await,
            None => {
                counter!("clawster_billing_events_total", "kind" => "ignored").increment(1);
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    pub async fn apply(&self, event: BillingEvent) -> Result<WebhookOutcome, OrchestratorError> {
        counter!("clawster_billing_events_total", "kind" => event.kind()).increment(1);
        let bot_id = event.bot_id();
        info!(bot_id = %bot_id, kind = event.kind(), "Billing event received");

        match event {
            BillingEvent::PaymentCompleted { .. } => {
                match self.deployment.deploy_when(bot_id, BotStatus::PendingPayment).await {
                    Ok(Some(report)) => Ok(match report.outcome {
                        DeploymentOutcome::Deployed { .. } => WebhookOutcome::Deployed { bot_id },
                        DeploymentOutcome::Failed { reason } => {
                            WebhookOutcome::DeploymentFailed { bot_id, reason }
                        }
                    }),
                    Ok(None) => Ok(WebhookOutcome::AlreadyHandled { bot_id }),
                    Err(OrchestratorError::NotFound(_)) => {
                        warn!(bot_id = %bot_id, "Payment completed for unknown bot");
                        Ok(WebhookOutcome::Ignored)
                    }
                    Err(e) => Err(e),
                }
            }
            BillingEvent::SubscriptionCancelled { .. } => {
                let Some(bot) = self.bots.find_by_id(bot_id).await? else {
                    warn!(bot_id = %bot_id, "Subscription cancelled for unknown bot");
                    return Ok(WebhookOutcome::Ignored);
                };
                if bot.status.is_terminal() {
                    return Ok(WebhookOutcome::AlreadyHandled { bot_id });
                }

                self.termination.terminate(bot_id).await?;
                Ok(WebhookOutcome::Terminated { bot_id })
            }
        }
    }
}
