// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Bot Repository
//!
//! `BotRepository` backed by the `bots` table. Staged secrets are stored as a
//! JSONB column that is nulled in the same UPDATE that records the instance
//! id, since `save` writes the whole aggregate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::bot::{Bot, BotId, BotName, BotStatus, InstanceSize, OwnerId, PendingSecrets};
use crate::domain::provisioning::InstanceId;
use crate::domain::repository::{BotRepository, RepositoryError};

const BOT_COLUMNS: &str = "id, owner_id, name, model, size, app_id, instance_id, \
     enclave_public_key, endpoint, pending_secrets, status, status_detail, \
     boot_started_at, created_at, updated_at, terminated_at";

pub struct PostgresBotRepository {
    pool: PgPool,
}

impl PostgresBotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_bot(row: &PgRow) -> Result<Bot, RepositoryError> {
        let id: uuid::Uuid = row.get("id");
        let owner_id: String = row.get("owner_id");
        let name: String = row.get("name");
        let size: String = row.get("size");
        let status: String = row.get("status");
        let secrets: Option<serde_json::Value> = row.get("pending_secrets");
        let instance_id: Option<String> = row.get("instance_id");

        let pending_secrets = secrets
            .map(serde_json::from_value::<PendingSecrets>)
            .transpose()?;

        Ok(Bot {
            id: BotId(id),
            owner: OwnerId::new(owner_id),
            name: BotName::parse(&name)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            model: row.get("model"),
            size: size
                .parse::<InstanceSize>()
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            app_id: row.get("app_id"),
            instance_id: instance_id.map(InstanceId::new),
            enclave_public_key: row.get("enclave_public_key"),
            endpoint: row.get("endpoint"),
            pending_secrets,
            status: status
                .parse::<BotStatus>()
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            status_detail: row.get("status_detail"),
            boot_started_at: row.get::<Option<DateTime<Utc>>, _>("boot_started_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            terminated_at: row.get::<Option<DateTime<Utc>>, _>("terminated_at"),
        })
    }

    fn rows_to_bots(rows: &[PgRow]) -> Result<Vec<Bot>, RepositoryError> {
        rows.iter().map(Self::row_to_bot).collect()
    }

    fn secrets_json(bot: &Bot) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(bot
            .pending_secrets
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?)
    }
}

#[async_trait]
impl BotRepository for PostgresBotRepository {
    async fn insert(&self, bot: &Bot) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO bots (
                id, owner_id, name, model, size, app_id, instance_id,
                enclave_public_key, endpoint, pending_secrets, status, status_detail,
                boot_started_at, created_at, updated_at, terminated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(bot.id.0)
        .bind(bot.owner.as_str())
        .bind(bot.name.as_str())
        .bind(&bot.model)
        .bind(bot.size.as_str())
        .bind(&bot.app_id)
        .bind(bot.instance_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&bot.enclave_public_key)
        .bind(&bot.endpoint)
        .bind(Self::secrets_json(bot)?)
        .bind(bot.status.as_str())
        .bind(&bot.status_detail)
        .bind(bot.boot_started_at)
        .bind(bot.created_at)
        .bind(bot.updated_at)
        .bind(bot.terminated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save(&self, bot: &Bot) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE bots SET
                model = $2,
                size = $3,
                app_id = $4,
                instance_id = $5,
                enclave_public_key = $6,
                endpoint = $7,
                pending_secrets = $8,
                status = $9,
                status_detail = $10,
                boot_started_at = $11,
                updated_at = $12,
                terminated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(bot.id.0)
        .bind(&bot.model)
        .bind(bot.size.as_str())
        .bind(&bot.app_id)
        .bind(bot.instance_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&bot.enclave_public_key)
        .bind(&bot.endpoint)
        .bind(Self::secrets_json(bot)?)
        .bind(bot.status.as_str())
        .bind(&bot.status_detail)
        .bind(bot.boot_started_at)
        .bind(bot.updated_at)
        .bind(bot.terminated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(bot.id.to_string()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: BotId) -> Result<Option<Bot>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM bots WHERE id = $1", BOT_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_bot).transpose()
    }

    async fn find_active_by_owner_and_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Option<Bot>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bots WHERE owner_id = $1 AND name = $2 AND status <> 'terminated'",
            BOT_COLUMNS
        ))
        .bind(owner.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_bot).transpose()
    }

    async fn find_terminated_by_owner_and_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Vec<Bot>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bots WHERE owner_id = $1 AND name = $2 AND status = 'terminated'",
            BOT_COLUMNS
        ))
        .bind(owner.as_str())
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_bots(&rows)
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Bot>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bots WHERE owner_id = $1 AND status <> 'terminated' ORDER BY created_at DESC",
            BOT_COLUMNS
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_bots(&rows)
    }

    async fn list_running(&self) -> Result<Vec<Bot>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bots WHERE status = 'running' AND instance_id IS NOT NULL",
            BOT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_bots(&rows)
    }

    async fn delete(&self, id: BotId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM bots WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
