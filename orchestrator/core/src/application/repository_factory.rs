// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on the storage backend
//! configuration. The domain layer only defines the traits.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select in-memory or PostgreSQL persistence at startup

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::repository::{BotRepository, StorageBackend, UsageRepository};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryBotRepository, InMemoryUsageRepository, PostgresBotRepository, PostgresUsageRepository,
};

#[derive(Clone)]
pub struct Repositories {
    pub bots: Arc<dyn BotRepository>,
    pub usage: Arc<dyn UsageRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        let bots = InMemoryBotRepository::new();
        let usage = InMemoryUsageRepository::new();
        Self {
            bots: Arc::new(bots),
            usage: Arc::new(usage),
        }
    }
}

/// Creates the repositories for the configured backend. PostgreSQL
/// connections are established and migrated before returning.
pub async fn create_repositories(backend: &StorageBackend) -> Result<Repositories> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory storage; state is lost on restart");
            Ok(Repositories::in_memory())
        }
        StorageBackend::PostgreSQL(config) => {
            let database = Database::new(&config.connection_string, config.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            database.migrate().await.context("Failed to run database migrations")?;

            let pool = database.get_pool().clone();
            Ok(Repositories {
                bots: Arc::new(PostgresBotRepository::new(pool.clone())),
                usage: Arc::new(PostgresUsageRepository::new(pool)),
            })
        }
    }
}
