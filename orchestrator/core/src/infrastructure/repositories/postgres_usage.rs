// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Usage Repository
//!
//! Append-only `usage_records` table. The `(bot_id, period_start)` unique
//! constraint makes a replayed metering window a no-op. Records carry their
//! owner so monthly totals survive the bot row being replaced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::bot::{BotId, OwnerId};
use crate::domain::repository::{RepositoryError, UsageRepository};
use crate::domain::usage::UsageRecord;

pub struct PostgresUsageRepository {
    pool: PgPool,
}

impl PostgresUsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> UsageRecord {
        UsageRecord {
            id: row.get("id"),
            bot_id: BotId(row.get("bot_id")),
            owner_id: OwnerId::new(row.get::<String, _>("owner_id")),
            period_start: row.get("period_start"),
            period_end: row.get("period_end"),
            hours: row.get("hours"),
            cost_usd: row.get("cost_usd"),
            metered_at: row.get("metered_at"),
        }
    }
}

#[async_trait]
impl UsageRepository for PostgresUsageRepository {
    async fn append(&self, record: &UsageRecord) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO usage_records
                (id, bot_id, owner_id, period_start, period_end, hours, cost_usd, metered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (bot_id, period_start) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.bot_id.0)
        .bind(record.owner_id.as_str())
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(record.hours)
        .bind(record.cost_usd)
        .bind(record.metered_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_bot(&self, bot_id: BotId) -> Result<Vec<UsageRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, bot_id, owner_id, period_start, period_end, hours, cost_usd, metered_at
            FROM usage_records
            WHERE bot_id = $1
            ORDER BY period_start
            "#,
        )
        .bind(bot_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    async fn list_for_owner_since(
        &self,
        owner: &OwnerId,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, bot_id, owner_id, period_start, period_end, hours, cost_usd, metered_at
            FROM usage_records
            WHERE owner_id = $1 AND period_start >= $2
            ORDER BY period_start
            "#,
        )
        .bind(owner.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }
}
