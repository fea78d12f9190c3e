// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use chrono::{Duration, TimeZone, Utc};

use clawster_core::application::{BotLifecycleService, OrchestratorSettings};
use clawster_core::domain::bot::{BotId, BotStatus};
use clawster_core::domain::events::BotLifecycleEvent;
use clawster_core::domain::provisioning::{ProvisioningError, RemoteStatus};
use clawster_core::domain::usage::MeteringWindow;

use common::{owner, Harness, ENDPOINT};

async fn running_bot(harness: &Harness, name: &str) -> BotId {
    let id = harness.spawn(name).await;
    let instance = harness.stored(id).await.instance_id.unwrap();
    harness
        .provider
        .set_remote(instance.as_str(), RemoteStatus::Running, Some(ENDPOINT));
    harness.probe.set_live(true);
    let view = harness.service.get_status(&owner(), id).await.unwrap();
    assert_eq!(view.status, BotStatus::Running);
    id
}

#[tokio::test]
async fn test_running_bot_is_metered_once_per_window() {
    let harness = Harness::bypass();
    let id = running_bot(&harness, "jarvis").await;
    let meter = harness.service.usage_meter();
    let mut events = harness.event_bus.subscribe();
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 14, 20, 0).unwrap();

    let report = meter.run_at(now).await.unwrap();
    assert_eq!(report.recorded, 1);

    let records = harness.repositories.usage.list_for_bot(id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].period_start, Utc.with_ymd_and_hms(2026, 3, 10, 13, 0, 0).unwrap());
    assert_eq!(records[0].period_end, Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap());
    assert!((records[0].hours - 1.0).abs() < 1e-9);
    assert!((records[0].cost_usd - 0.12).abs() < 1e-9);
    assert!(matches!(events.recv().await.unwrap(), BotLifecycleEvent::UsageRecorded { .. }));

    // Same window, later in the hour
    let report = meter.run_at(now + Duration::minutes(30)).await.unwrap();
    assert_eq!(report.recorded, 0);
    assert_eq!(report.duplicates, 1);

    let report = meter.run_at(now + Duration::hours(1)).await.unwrap();
    assert_eq!(report.recorded, 1);
    assert_eq!(harness.repositories.usage.list_for_bot(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_only_running_bots_are_metered() {
    let harness = Harness::bypass();
    harness.spawn("starting").await;

    let report = harness.service.usage_meter().run_once().await.unwrap();
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn test_stopped_instance_is_marked_stopped() {
    let harness = Harness::bypass();
    let id = running_bot(&harness, "jarvis").await;
    harness.provider.set_remote("cvm-1", RemoteStatus::Stopped, None);

    let report = harness.service.usage_meter().run_once().await.unwrap();
    assert_eq!(report.stopped, 1);
    assert_eq!(report.recorded, 0);
    assert_eq!(harness.stored(id).await.status, BotStatus::Stopped);
    assert!(harness.repositories.usage.list_for_bot(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_instance_is_marked_stopped() {
    let harness = Harness::bypass();
    let id = running_bot(&harness, "jarvis").await;
    harness.provider.remote.lock().clear();

    let report = harness.service.usage_meter().run_once().await.unwrap();
    assert_eq!(report.stopped, 1);
    assert_eq!(harness.stored(id).await.status, BotStatus::Stopped);
}

#[tokio::test]
async fn test_failed_instance_is_marked_error() {
    let harness = Harness::bypass();
    let id = running_bot(&harness, "jarvis").await;
    harness.provider.set_remote("cvm-1", RemoteStatus::Failed, None);

    let report = harness.service.usage_meter().run_once().await.unwrap();
    assert_eq!(report.errored, 1);

    let stored = harness.stored(id).await;
    assert_eq!(stored.status, BotStatus::Error);
    assert!(stored.status_detail.unwrap().contains("failed"));
}

#[tokio::test]
async fn test_unverifiable_bot_is_skipped_without_charge() {
    let harness = Harness::bypass();
    let id = running_bot(&harness, "jarvis").await;
    *harness.provider.status_error.lock() = Some(ProvisioningError::Unavailable("503".into()));

    let report = harness.service.usage_meter().run_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.stored(id).await.status, BotStatus::Running);
    assert!(harness.repositories.usage.list_for_bot(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_usage_summary_reports_burn_and_month_to_date() {
    let mut settings = OrchestratorSettings::default();
    settings.metering.interval = std::time::Duration::from_secs(60);
    let harness = Harness::build(false, settings);
    running_bot(&harness, "jarvis").await;

    let now = Utc::now();
    harness.service.usage_meter().run_at(now).await.unwrap();
    let summary = harness.service.usage_summary(&owner()).await.unwrap();

    assert_eq!(summary.running_bots, 1);
    assert!((summary.hourly_burn_usd - 0.12).abs() < 1e-9);
    assert!((summary.estimated_monthly_usd - 0.12 * 720.0).abs() < 1e-6);

    // A one-minute window metered just now falls in this month unless the
    // month began less than a minute ago.
    let window = MeteringWindow::ending_at(now, Duration::seconds(60));
    if window.start >= summary.month_start {
        assert!((summary.month_hours - 1.0 / 60.0).abs() < 1e-9);
        assert!((summary.month_cost_usd - 0.12 / 60.0).abs() < 1e-9);
    }

    let other = harness
        .service
        .usage_summary(&clawster_core::domain::bot::OwnerId::new("u2"))
        .await
        .unwrap();
    assert_eq!(other.running_bots, 0);
    assert_eq!(other.month_hours, 0.0);
}

#[tokio::test]
async fn test_month_to_date_keeps_usage_of_replaced_bot() {
    let mut settings = OrchestratorSettings::default();
    settings.metering.interval = std::time::Duration::from_secs(60);
    let harness = Harness::build(false, settings);
    let first = running_bot(&harness, "jarvis").await;

    let now = Utc::now();
    harness.service.usage_meter().run_at(now).await.unwrap();
    let before = harness.service.usage_summary(&owner()).await.unwrap();

    harness.service.terminate(&owner(), first).await.unwrap();
    let again = harness
        .service
        .spawn(&owner(), common::spawn_request("jarvis"))
        .await
        .unwrap();
    assert_ne!(again.bot.id, first);
    assert!(harness.repositories.bots.find_by_id(first).await.unwrap().is_none());

    let after = harness.service.usage_summary(&owner()).await.unwrap();
    assert_eq!(after.month_hours, before.month_hours);
    assert_eq!(after.month_cost_usd, before.month_cost_usd);
    assert_eq!(after.running_bots, 0);

    let window = MeteringWindow::ending_at(now, Duration::seconds(60));
    if window.start >= after.month_start {
        assert!((after.month_hours - 1.0 / 60.0).abs() < 1e-9);
    }
    assert_eq!(harness.repositories.usage.list_for_bot(first).await.unwrap().len(), 1);
}
