// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the two aggregates, following the DDD Repository
//! pattern: interface defined here, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `BotRepository` | `Bot` | `InMemoryBotRepository`, `PostgresBotRepository` |
//! | `UsageRepository` | `UsageRecord` | `InMemoryUsageRepository`, `PostgresUsageRepository` |
//!
//! Implementations are selected at startup from `storage.backend` in
//! `clawster-config.yaml`; see `crate::application::repository_factory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::domain::bot::{Bot, BotId, OwnerId};
use crate::domain::usage::UsageRecord;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Repository interface for Bot aggregates
#[async_trait]
pub trait BotRepository: Send + Sync {
    /// Insert a new bot. Fails with `Conflict` when a non-terminated bot with
    /// the same (owner, name) already exists.
    async fn insert(&self, bot: &Bot) -> Result<(), RepositoryError>;

    /// Persist every mutable field of an existing bot
    async fn save(&self, bot: &Bot) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: BotId) -> Result<Option<Bot>, RepositoryError>;

    /// Non-terminated bot with this name
    async fn find_active_by_owner_and_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Option<Bot>, RepositoryError>;

    async fn find_terminated_by_owner_and_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Vec<Bot>, RepositoryError>;

    /// Non-terminated bots, newest first
    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Bot>, RepositoryError>;

    /// Bots in `running` with a known instance id
    async fn list_running(&self) -> Result<Vec<Bot>, RepositoryError>;

    /// Only used to free a terminated bot's name for reuse
    async fn delete(&self, id: BotId) -> Result<(), RepositoryError>;
}

/// Append-only store for usage records
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Append a record. Returns `false` when a record for the same
    /// (bot, period start) already exists and nothing was written.
    async fn append(&self, record: &UsageRecord) -> Result<bool, RepositoryError>;

    async fn list_for_bot(&self, bot_id: BotId) -> Result<Vec<UsageRecord>, RepositoryError>;

    /// Records for any of the owner's bots with `period_start >= since`
    async fn list_for_owner_since(
        &self,
        owner: &OwnerId,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                RepositoryError::Conflict(db_err.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
