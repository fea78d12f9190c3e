// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Usage records: one immutable row per verified-running bot per metering window.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::bot::{BotId, InstanceSize, OwnerId};

/// Metering window aligned to multiples of the interval since the Unix epoch.
/// Two meter runs inside the same interval produce the same window, which is
/// what makes `(bot_id, period_start)` a usable uniqueness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeteringWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MeteringWindow {
    pub fn ending_at(now: DateTime<Utc>, interval: Duration) -> Self {
        let secs = interval.num_seconds().max(1);
        let end_ts = now.timestamp() - now.timestamp().rem_euclid(secs);
        let end = Utc.timestamp_opt(end_ts, 0).single().unwrap_or(now);
        Self {
            start: end - Duration::seconds(secs),
            end,
        }
    }

    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub bot_id: BotId,
    /// Copied from the bot at metering time; outlives the bot row.
    pub owner_id: OwnerId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub hours: f64,
    pub cost_usd: f64,
    pub metered_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Bill `window` at the tier's retail price.
    pub fn for_window(
        bot_id: BotId,
        owner_id: OwnerId,
        size: InstanceSize,
        window: MeteringWindow,
        metered_at: DateTime<Utc>,
    ) -> Self {
        let hours = window.hours();
        Self {
            id: Uuid::new_v4(),
            bot_id,
            owner_id,
            period_start: window.start,
            period_end: window.end,
            hours,
            cost_usd: hours * size.spec().retail_per_hour,
            metered_at,
        }
    }
}
