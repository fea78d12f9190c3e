// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve bots and usage records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresBotRepository** / **PostgresUsageRepository**: production storage
//! - **InMemoryBotRepository** / **InMemoryUsageRepository**: development and tests

pub mod postgres_bot;
pub mod postgres_usage;

pub use postgres_bot::PostgresBotRepository;
pub use postgres_usage::PostgresUsageRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::bot::{Bot, BotId, BotStatus, OwnerId};
use crate::domain::repository::{BotRepository, RepositoryError, UsageRepository};
use crate::domain::usage::UsageRecord;

#[derive(Clone, Default)]
pub struct InMemoryBotRepository {
    bots: Arc<RwLock<HashMap<BotId, Bot>>>,
}

impl InMemoryBotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn insert(&self, bot: &Bot) -> Result<(), RepositoryError> {
        let mut bots = self.bots.write();
        let duplicate = bots.values().any(|existing| {
            existing.owner == bot.owner
                && existing.name == bot.name
                && existing.status != BotStatus::Terminated
        });
        if duplicate || bots.contains_key(&bot.id) {
            return Err(RepositoryError::Conflict(format!(
                "bot '{}' already exists for owner {}",
                bot.name, bot.owner
            )));
        }
        bots.insert(bot.id, bot.clone());
        Ok(())
    }

    async fn save(&self, bot: &Bot) -> Result<(), RepositoryError> {
        let mut bots = self.bots.write();
        match bots.get_mut(&bot.id) {
            Some(existing) => {
                *existing = bot.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(bot.id.to_string())),
        }
    }

    async fn find_by_id(&self, id: BotId) -> Result<Option<Bot>, RepositoryError> {
        Ok(self.bots.read().get(&id).cloned())
    }

    async fn find_active_by_owner_and_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Option<Bot>, RepositoryError> {
        let bots = self.bots.read();
        Ok(bots
            .values()
            .find(|b| &b.owner == owner && b.name.as_str() == name && b.status != BotStatus::Terminated)
            .cloned())
    }

    async fn find_terminated_by_owner_and_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Vec<Bot>, RepositoryError> {
        let bots = self.bots.read();
        Ok(bots
            .values()
            .filter(|b| &b.owner == owner && b.name.as_str() == name && b.status == BotStatus::Terminated)
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Bot>, RepositoryError> {
        let bots = self.bots.read();
        let mut owned: Vec<Bot> = bots
            .values()
            .filter(|b| &b.owner == owner && b.status != BotStatus::Terminated)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn list_running(&self) -> Result<Vec<Bot>, RepositoryError> {
        let bots = self.bots.read();
        Ok(bots
            .values()
            .filter(|b| b.status == BotStatus::Running && b.instance_id.is_some())
            .cloned()
            .collect())
    }

    async fn delete(&self, id: BotId) -> Result<(), RepositoryError> {
        self.bots.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUsageRepository {
    records: Arc<RwLock<Vec<UsageRecord>>>,
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn append(&self, record: &UsageRecord) -> Result<bool, RepositoryError> {
        let mut records = self.records.write();
        let exists = records
            .iter()
            .any(|r| r.bot_id == record.bot_id && r.period_start == record.period_start);
        if exists {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn list_for_bot(&self, bot_id: BotId) -> Result<Vec<UsageRecord>, RepositoryError> {
        let mut records: Vec<UsageRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.bot_id == bot_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.period_start);
        Ok(records)
    }

    async fn list_for_owner_since(
        &self,
        owner: &OwnerId,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, RepositoryError> {
        let mut records: Vec<UsageRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| &r.owner_id == owner && r.period_start >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.period_start);
        Ok(records)
    }
}
