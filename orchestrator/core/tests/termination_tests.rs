// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use clawster_core::application::{BotLifecycleService, OrchestratorError};
use clawster_core::domain::bot::BotStatus;
use clawster_core::domain::events::BotLifecycleEvent;
use clawster_core::domain::provisioning::{DeleteOutcome, ProvisioningError};

use common::{owner, Harness};

#[tokio::test]
async fn test_terminate_deletes_app_first_and_stops() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;
    let mut events = harness.event_bus.subscribe();

    let view = harness.service.terminate(&owner(), id).await.unwrap();
    assert_eq!(view.status, BotStatus::Terminated);
    assert!(view.terminated_at.is_some());
    assert_eq!(harness.provider.deletes(), vec!["app-1".to_string()]);

    assert!(matches!(
        events.recv().await.unwrap(),
        BotLifecycleEvent::StatusChanged { to: BotStatus::Terminated, .. }
    ));
    assert!(matches!(events.recv().await.unwrap(), BotLifecycleEvent::BotTerminated { .. }));
}

#[tokio::test]
async fn test_failed_delete_falls_through_to_instance() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;
    harness
        .provider
        .script_delete("app-1", Err(ProvisioningError::Unavailable("502".into())));

    let view = harness.service.terminate(&owner(), id).await.unwrap();
    assert_eq!(view.status, BotStatus::Terminated);
    assert_eq!(harness.provider.deletes(), vec!["app-1".to_string(), "cvm-1".to_string()]);
}

#[tokio::test]
async fn test_not_found_counts_as_deleted() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;
    harness
        .provider
        .script_delete("app-1", Err(ProvisioningError::NotFound("app-1".into())));

    let view = harness.service.terminate(&owner(), id).await.unwrap();
    assert_eq!(view.status, BotStatus::Terminated);
    assert_eq!(harness.provider.deletes(), vec!["app-1".to_string()]);
}

#[tokio::test]
async fn test_already_gone_counts_as_deleted() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;
    harness.provider.script_delete("app-1", Ok(DeleteOutcome::AlreadyGone));

    let view = harness.service.terminate(&owner(), id).await.unwrap();
    assert_eq!(view.status, BotStatus::Terminated);
}

#[tokio::test]
async fn test_unconfirmed_delete_keeps_previous_status() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;
    harness
        .provider
        .script_delete("app-1", Err(ProvisioningError::Unavailable("timeout".into())));
    harness
        .provider
        .script_delete("cvm-1", Err(ProvisioningError::Rejected("500".into())));

    let err = harness.service.terminate(&owner(), id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::TerminationFailed(_)));

    let stored = harness.stored(id).await;
    assert_eq!(stored.status, BotStatus::Starting);
    assert!(stored.terminated_at.is_none());
    assert_eq!(stored.instance_id.as_ref().map(|i| i.as_str()), Some("cvm-1"));

    // The provider recovers and the retry goes through
    harness.provider.delete_results.lock().clear();
    let view = harness.service.terminate(&owner(), id).await.unwrap();
    assert_eq!(view.status, BotStatus::Terminated);
}

#[tokio::test]
async fn test_bot_without_remote_ids_terminates_locally() {
    let harness = Harness::gated();
    let spawned = harness
        .service
        .spawn(&owner(), common::spawn_request("jarvis"))
        .await
        .unwrap();
    assert_eq!(spawned.bot.status, BotStatus::PendingPayment);

    let view = harness.service.terminate(&owner(), spawned.bot.id).await.unwrap();
    assert_eq!(view.status, BotStatus::Terminated);
    assert!(harness.provider.deletes().is_empty());

    // Staged secrets never outlive the bot
    assert!(harness.stored(spawned.bot.id).await.pending_secrets.is_none());
}

#[tokio::test]
async fn test_terminating_twice_is_a_no_op() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;

    let first = harness.service.terminate(&owner(), id).await.unwrap();
    let second = harness.service.terminate(&owner(), id).await.unwrap();
    assert_eq!(first.terminated_at, second.terminated_at);
    assert_eq!(harness.provider.deletes().len(), 1);
}

#[tokio::test]
async fn test_terminated_bot_is_hidden_from_list() {
    let harness = Harness::bypass();
    let keep = harness.spawn("keeper").await;
    let gone = harness.spawn("goner").await;

    harness.service.terminate(&owner(), gone).await.unwrap();

    let listed: Vec<_> = harness
        .service
        .list(&owner())
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(listed, vec![keep]);
    assert!(harness.repositories.bots.find_by_id(gone).await.unwrap().is_some());
}

#[tokio::test]
async fn test_other_owner_cannot_terminate() {
    let harness = Harness::bypass();
    let id = harness.spawn("jarvis").await;

    let err = harness
        .service
        .terminate(&clawster_core::domain::bot::OwnerId::new("u2"), id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert!(harness.provider.deletes().is_empty());
}
