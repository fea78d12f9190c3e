// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Payment-gated spawning and webhook delivery semantics.

mod common;

use std::sync::atomic::Ordering;

use clawster_core::application::billing_flow::WebhookOutcome;
use clawster_core::application::{BotLifecycleService, OrchestratorError};
use clawster_core::domain::bot::{BotId, BotStatus};
use clawster_core::domain::provisioning::ProvisioningError;

use common::{owner, spawn_request, webhook_payload, Harness};

#[tokio::test]
async fn test_gated_spawn_returns_checkout_url() {
    let harness = Harness::gated();

    let spawned = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap();
    assert_eq!(spawned.bot.status, BotStatus::PendingPayment);
    assert_eq!(
        spawned.checkout_url.as_deref(),
        Some(format!("https://pay.test/{}", spawned.bot.id).as_str())
    );
    assert!(spawned.bot.instance_id.is_none());
    assert_eq!(harness.provider.commit_count(), 0);

    let checkouts = harness.billing.as_ref().unwrap().checkouts.lock();
    assert_eq!(checkouts.len(), 1);
    assert_eq!(checkouts[0].bot_id, spawned.bot.id);

    // Secrets wait for payment
    drop(checkouts);
    assert!(harness.stored(spawned.bot.id).await.pending_secrets.is_some());
}

#[tokio::test]
async fn test_checkout_failure_marks_bot_error() {
    let harness = Harness::gated();
    harness
        .billing
        .as_ref()
        .unwrap()
        .fail_checkout
        .store(true, Ordering::SeqCst);

    let err = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ExternalUnavailable(_)));

    let listed = harness.service.list(&owner()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, BotStatus::Error);

    let stored = harness.stored(listed[0].id).await;
    assert!(stored.pending_secrets.is_none());
}

#[tokio::test]
async fn test_payment_completion_deploys_once() {
    let harness = Harness::gated();
    let id = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap().bot.id;
    let payload = webhook_payload("paid", id);

    let first = harness.service.billing_webhook(&payload, "valid").await.unwrap();
    assert_eq!(first, WebhookOutcome::Deployed { bot_id: id });

    let replay = harness.service.billing_webhook(&payload, "valid").await.unwrap();
    assert_eq!(replay, WebhookOutcome::AlreadyHandled { bot_id: id });

    assert_eq!(harness.provider.commit_count(), 1);
    let stored = harness.stored(id).await;
    assert_eq!(stored.status, BotStatus::Starting);
    assert!(stored.pending_secrets.is_none());
}

#[tokio::test]
async fn test_concurrent_payment_deliveries_deploy_once() {
    let harness = Harness::gated();
    let id = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap().bot.id;
    let payload = webhook_payload("paid", id);

    let (a, b) = tokio::join!(
        harness.service.billing_webhook(&payload, "valid"),
        harness.service.billing_webhook(&payload, "valid"),
    );
    let mut outcomes = vec![a.unwrap().as_str(), b.unwrap().as_str()];
    outcomes.sort();

    assert_eq!(outcomes, vec!["already_handled", "deployed"]);
    assert_eq!(harness.provider.commit_count(), 1);
}

#[tokio::test]
async fn test_failed_deployment_is_reported_not_retried() {
    let harness = Harness::gated();
    let id = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap().bot.id;
    *harness.provider.commit_error.lock() = Some(ProvisioningError::Rejected("no capacity".into()));

    let outcome = harness
        .service
        .billing_webhook(&webhook_payload("paid", id), "valid")
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::DeploymentFailed { reason, .. } if reason.contains("no capacity")));
    assert_eq!(harness.stored(id).await.status, BotStatus::Error);
}

#[tokio::test]
async fn test_cancellation_terminates_bot() {
    let harness = Harness::gated();
    let id = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap().bot.id;
    harness
        .service
        .billing_webhook(&webhook_payload("paid", id), "valid")
        .await
        .unwrap();

    let outcome = harness
        .service
        .billing_webhook(&webhook_payload("cancelled", id), "valid")
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Terminated { bot_id: id });
    assert_eq!(harness.stored(id).await.status, BotStatus::Terminated);
    assert_eq!(harness.provider.deletes(), vec!["app-1".to_string()]);

    let again = harness
        .service
        .billing_webhook(&webhook_payload("cancelled", id), "valid")
        .await
        .unwrap();
    assert_eq!(again, WebhookOutcome::AlreadyHandled { bot_id: id });
}

#[tokio::test]
async fn test_invalid_signature_is_rejected() {
    let harness = Harness::gated();
    let id = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap().bot.id;

    let err = harness
        .service
        .billing_webhook(&webhook_payload("paid", id), "forged")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(harness.stored(id).await.status, BotStatus::PendingPayment);
}

#[tokio::test]
async fn test_unknown_bots_and_event_types_are_ignored() {
    let harness = Harness::gated();
    let stranger = BotId::new();

    let outcome = harness
        .service
        .billing_webhook(&webhook_payload("paid", stranger), "valid")
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let outcome = harness
        .service
        .billing_webhook(&webhook_payload("cancelled", stranger), "valid")
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let outcome = harness
        .service
        .billing_webhook(&webhook_payload("invoice.created", stranger), "valid")
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn test_webhooks_disabled_without_billing() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;

    let err = harness
        .service
        .billing_webhook(&webhook_payload("paid", id), "valid")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_restart_before_payment_requires_payment() {
    let harness = Harness::gated();
    let id = harness.service.spawn(&owner(), spawn_request("jarvis")).await.unwrap().bot.id;

    let err = harness.service.restart(&owner(), id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::PaymentRequired(_)));
}
