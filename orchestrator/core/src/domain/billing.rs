// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Billing collaborator interface
//!
//! The payment provider owns checkout and subscriptions. The orchestrator only
//! needs to open a checkout keyed by bot id and size, and to understand the
//! two webhook events that drive a bot's lifecycle.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::bot::{BotId, InstanceSize, OwnerId};

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub bot_id: BotId,
    pub owner: OwnerId,
    pub size: InstanceSize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    PaymentCompleted { bot_id: BotId },
    SubscriptionCancelled { bot_id: BotId },
}

impl BillingEvent {
    pub fn bot_id(&self) -> BotId {
        match self {
            BillingEvent::PaymentCompleted { bot_id }
            | BillingEvent::SubscriptionCancelled { bot_id } => *bot_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::PaymentCompleted { .. } => "payment_completed",
            BillingEvent::SubscriptionCancelled { .. } => "subscription_cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing provider unavailable: {0}")]
    Unavailable(String),

    #[error("Billing provider rejected the request: {0}")]
    Rejected(String),

    #[error("No price configured for instance size '{0}'")]
    MissingPrice(String),

    #[error("Webhook signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Open a payment-collection session tagged with the bot id and size
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, BillingError>;

    /// Verify and decode a webhook delivery. Event types the orchestrator
    /// does not act on decode to `None`.
    fn parse_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<Option<BillingEvent>, BillingError>;
}
