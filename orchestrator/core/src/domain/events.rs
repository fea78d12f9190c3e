// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bot::{BotId, BotStatus, OwnerId};
use crate::domain::provisioning::InstanceId;

/// Bot lifecycle events, published on the event bus after the change is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BotLifecycleEvent {
    BotStaged {
        bot_id: BotId,
        owner: OwnerId,
        status: BotStatus,
        staged_at: DateTime<Utc>,
    },
    StatusChanged {
        bot_id: BotId,
        from: BotStatus,
        to: BotStatus,
        changed_at: DateTime<Utc>,
    },
    BotDeployed {
        bot_id: BotId,
        app_id: String,
        instance_id: InstanceId,
        deployed_at: DateTime<Utc>,
    },
    DeploymentFailed {
        bot_id: BotId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    BotTerminated {
        bot_id: BotId,
        terminated_at: DateTime<Utc>,
    },
    UsageRecorded {
        bot_id: BotId,
        period_start: DateTime<Utc>,
        hours: f64,
        cost_usd: f64,
    },
}

impl BotLifecycleEvent {
    pub fn bot_id(&self) -> BotId {
        match self {
            BotLifecycleEvent::BotStaged { bot_id, .. }
            | BotLifecycleEvent::StatusChanged { bot_id, .. }
            | BotLifecycleEvent::BotDeployed { bot_id, .. }
            | BotLifecycleEvent::DeploymentFailed { bot_id, .. }
            | BotLifecycleEvent::BotTerminated { bot_id, .. }
            | BotLifecycleEvent::UsageRecorded { bot_id, .. } => *bot_id,
        }
    }
}
