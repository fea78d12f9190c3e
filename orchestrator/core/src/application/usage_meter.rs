// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Usage Meter - Background task recording bot-hours
//!
//! Every interval, each `running` bot is re-checked against the provider.
//! Bots still running get one usage record for the window that just closed;
//! bots the provider no longer reports as running are moved to `stopped` or
//! `error`. Windows are aligned to the interval, so a double-fired cycle
//! finds the record already present and writes nothing.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic metering with graceful shutdown

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::error::OrchestratorError;
use crate::application::locks::BotLockRegistry;
use crate::domain::bot::{Bot, BotStatus};
use crate::domain::events::BotLifecycleEvent;
use crate::domain::provisioning::{ProvisioningProvider, RemoteStatus};
use crate::domain::repository::{BotRepository, UsageRepository};
use crate::domain::usage::{MeteringWindow, UsageRecord};
use crate::infrastructure::event_bus::EventBus;

/// Configuration for the usage meter
#[derive(Debug, Clone)]
pub struct UsageMeterConfig {
    pub enabled: bool,

    /// Metering period; also the length of each usage window
    pub interval: Duration,
}

impl Default for UsageMeterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
        }
    }
}

/// Per-cycle tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterReport {
    pub recorded: usize,
    pub duplicates: usize,
    pub stopped: usize,
    pub errored: usize,
    pub skipped: usize,
}

enum MeterStep {
    Recorded,
    Duplicate,
    Stopped,
    Errored,
    Skipped,
}

pub struct UsageMeter {
    bots: Arc<dyn BotRepository>,
    usage: Arc<dyn UsageRepository>,
    provider: Arc<dyn ProvisioningProvider>,
    locks: BotLockRegistry,
    event_bus: EventBus,
    config: UsageMeterConfig,
    shutdown_token: CancellationToken,
}

impl UsageMeter {
    pub fn new(
        bots: Arc<dyn BotRepository>,
        usage: Arc<dyn UsageRepository>,
        provider: Arc<dyn ProvisioningProvider>,
        locks: BotLockRegistry,
        event_bus: EventBus,
        config: UsageMeterConfig,
    ) -> Self {
        Self {
            bots,
            usage,
            provider,
            locks,
            event_bus,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Usage meter is disabled");
            return;
        }

        info!(
            interval_seconds = self.config.interval.as_secs(),
            "Starting usage meter background task"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first window closes one interval from now.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running usage meter cycle");
                    match self.run_once().await {
                        Ok(report) => info!(
                            recorded = report.recorded,
                            duplicates = report.duplicates,
                            stopped = report.stopped,
                            errored = report.errored,
                            skipped = report.skipped,
                            "Usage meter cycle completed"
                        ),
                        Err(e) => warn!("Usage meter cycle failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping usage meter");
                    break;
                }
            }
        }

        info!("Usage meter background task stopped");
    }

    pub async fn run_once(&self) -> Result<MeterReport, OrchestratorError> {
        self.run_at(Utc::now()).await
    }

    /// One metering cycle for the window that closed at or before `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<MeterReport, OrchestratorError> {
        let interval = chrono::Duration::seconds(self.config.interval.as_secs() as i64);
        let window = MeteringWindow::ending_at(now, interval);
        let mut report = MeterReport::default();

        for candidate in self.bots.list_running().await? {
            let Some(_guard) = self.locks.try_acquire(candidate.id) else {
                debug!(bot_id = %candidate.id, "Bot busy, skipping this metering cycle");
                report.skipped += 1;
                continue;
            };

            let step = match self.bots.find_by_id(candidate.id).await? {
                Some(bot) if bot.status == BotStatus::Running => self.meter_bot(bot, window, now).await?,
                _ => MeterStep::Skipped,
            };

            match step {
                MeterStep::Recorded => report.recorded += 1,
                MeterStep::Duplicate => report.duplicates += 1,
                MeterStep::Stopped => report.stopped += 1,
                MeterStep::Errored => report.errored += 1,
                MeterStep::Skipped => report.skipped += 1,
            }
        }

        Ok(report)
    }

    async fn meter_bot(
        &self,
        mut bot: Bot,
        window: MeteringWindow,
        now: DateTime<Utc>,
    ) -> Result<MeterStep, OrchestratorError> {
        let Some(instance_id) = bot.instance_id.clone() else {
            return Ok(MeterStep::Skipped);
        };

        let remote = match self.provider.get_status(&instance_id).await {
            Ok(state) => state.status,
            Err(e) if e.is_not_found() => RemoteStatus::Stopped,
            Err(e) => {
                warn!(bot_id = %bot.id, instance_id = %instance_id, error = %e, "Could not verify bot, skipping");
                return Ok(MeterStep::Skipped);
            }
        };

        let step = match remote {
            RemoteStatus::Running => {
                let record = UsageRecord::for_window(bot.id, bot.owner.clone(), bot.size, window, now);
                if !self.usage.append(&record).await? {
                    debug!(bot_id = %bot.id, period_start = %window.start, "Window already metered");
                    return Ok(MeterStep::Duplicate);
                }
                counter!("clawster_usage_records_total").increment(1);
                self.event_bus.publish(BotLifecycleEvent::UsageRecorded {
                    bot_id: bot.id,
                    period_start: record.period_start,
                    hours: record.hours,
                    cost_usd: record.cost_usd,
                });
                return Ok(MeterStep::Recorded);
            }
            RemoteStatus::Stopped => {
                bot.apply_status(BotStatus::Stopped);
                MeterStep::Stopped
            }
            other => {
                bot.mark_error(format!("provider reported status {} while metering", other.as_str()));
                MeterStep::Errored
            }
        };

        self.bots.save(&bot).await?;
        info!(bot_id = %bot.id, to = %bot.status, "Bot no longer running");
        self.event_bus.publish(BotLifecycleEvent::StatusChanged {
            bot_id: bot.id,
            from: BotStatus::Running,
            to: bot.status,
            changed_at: now,
        });
        Ok(step)
    }
}
