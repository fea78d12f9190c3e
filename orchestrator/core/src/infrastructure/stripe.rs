// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Stripe Billing Adapter
//
// Anti-Corruption Layer for Stripe Checkout and webhooks, spoken over plain
// form-encoded HTTP. Only the two events that move a bot through its
// lifecycle are decoded; everything else is acknowledged and ignored.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::domain::billing::{
    BillingError, BillingEvent, BillingProvider, CheckoutRequest, CheckoutSession,
};
use crate::domain::bot::{BotId, InstanceSize};
use crate::domain::platform_config::{resolve_secret, StripeConfig};

type HmacSha256 = Hmac<Sha256>;

pub const BOT_ID_METADATA: &str = "clawster_bot_id";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct StripeBilling {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    config: StripeConfig,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Deserialize)]
struct WebhookObject {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, as Stripe signs deliveries
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    hex::encode(signature_bytes(secret, timestamp, payload))
}

fn signature_bytes(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>..]`)
/// at the given instant.
pub fn verify_signature_at(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), BillingError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| BillingError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(BillingError::InvalidSignature("missing v1 signature".to_string()));
    }
    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(BillingError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let expected = signature_bytes(secret, timestamp, payload);
    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|provided| bool::from(expected.as_slice().ct_eq(provided.as_slice())))
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidSignature("no matching signature".to_string()))
    }
}

/// Decode a verified event body into the billing events the orchestrator acts on
pub fn decode_event(payload: &[u8]) -> Result<Option<BillingEvent>, BillingError> {
    let event: WebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;

    let bot_id = || -> Result<Option<BotId>, BillingError> {
        match event.data.object.metadata.get(BOT_ID_METADATA) {
            Some(raw) => BotId::from_string(raw)
                .map(Some)
                .map_err(|e| BillingError::MalformedPayload(format!("invalid {}: {}", BOT_ID_METADATA, e))),
            None => Ok(None),
        }
    };

    match event.event_type.as_str() {
        "checkout.session.completed" => match bot_id()? {
            Some(bot_id) => Ok(Some(BillingEvent::PaymentCompleted { bot_id })),
            None => {
                warn!("Checkout completed without a bot id in metadata");
                Ok(None)
            }
        },
        "customer.subscription.deleted" => match bot_id()? {
            Some(bot_id) => Ok(Some(BillingEvent::SubscriptionCancelled { bot_id })),
            None => {
                warn!("Subscription deleted without a bot id in metadata");
                Ok(None)
            }
        },
        other => {
            debug!(event_type = %other, "Ignoring webhook event");
            Ok(None)
        }
    }
}

impl StripeBilling {
    pub fn new(config: &StripeConfig) -> anyhow::Result<Self> {
        let secret_key = resolve_secret(&config.secret_key)?
            .ok_or_else(|| anyhow::anyhow!("billing.stripe.secret_key is not configured"))?;
        let webhook_secret = resolve_secret(&config.webhook_secret)?
            .ok_or_else(|| anyhow::anyhow!("billing.stripe.webhook_secret is not configured"))?;

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key,
            webhook_secret,
            config: config.clone(),
        })
    }

    fn price_for(&self, size: InstanceSize) -> Result<&str, BillingError> {
        self.config
            .price_for(size)
            .ok_or_else(|| BillingError::MissingPrice(size.to_string()))
    }

    /// Verify against an explicit clock
    pub fn parse_webhook_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<Option<BillingEvent>, BillingError> {
        verify_signature_at(
            &self.webhook_secret,
            payload,
            signature_header,
            self.config.webhook_tolerance_secs,
            now,
        )?;
        decode_event(payload)
    }
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, BillingError> {
        let price = self.price_for(request.size)?;
        let bot_id = request.bot_id.to_string();
        let size = request.size.as_str();

        let form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", price),
            ("line_items[0][quantity]", "1"),
            ("success_url", self.config.success_url.as_str()),
            ("cancel_url", self.config.cancel_url.as_str()),
            ("client_reference_id", request.owner.as_str()),
            ("metadata[clawster_bot_id]", bot_id.as_str()),
            ("metadata[instance_size]", size),
            ("subscription_data[metadata][clawster_bot_id]", bot_id.as_str()),
            ("subscription_data[metadata][instance_size]", size),
        ];

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            let detail = format!("HTTP {}: {}", status.as_u16(), body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                BillingError::Unavailable(detail)
            } else {
                BillingError::Rejected(detail)
            });
        }

        let session: SessionResponse = serde_json::from_str(&body)
            .map_err(|e| BillingError::Unavailable(format!("Failed to parse checkout session: {}", e)))?;
        let url = session
            .url
            .ok_or_else(|| BillingError::Unavailable("checkout session has no url".to_string()))?;

        debug!(bot_id = %request.bot_id, session_id = %session.id, "Checkout session created");
        Ok(CheckoutSession { id: session.id, url })
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<Option<BillingEvent>, BillingError> {
        self.parse_webhook_at(payload, signature_header, Utc::now().timestamp())
    }
}
