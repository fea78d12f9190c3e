// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-bot advisory locks.
//!
//! At most one deploy, reconcile, restart, terminate or metering pass may be
//! in flight for a given bot. Deploy, restart, terminate and payment handling
//! wait for the lock; reconciliation and metering skip the bot when it is
//! held, and the next pass catches up.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::bot::BotId;

pub type BotGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct BotLockRegistry {
    locks: Arc<DashMap<BotId, Arc<Mutex<()>>>>,
}

impl BotLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: BotId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `id`
    pub async fn acquire(&self, id: BotId) -> BotGuard {
        self.lock_for(id).lock_owned().await
    }

    /// Exclusive access to `id` if nobody else holds it
    pub fn try_acquire(&self, id: BotId) -> Option<BotGuard> {
        self.lock_for(id).try_lock_owned().ok()
    }

    /// Drop the lock entry of a bot that will never be touched again
    pub fn forget(&self, id: BotId) {
        self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
