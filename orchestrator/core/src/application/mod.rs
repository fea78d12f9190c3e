// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod billing_flow;
pub mod bot_service;
pub mod deployment;
pub mod error;
pub mod locks;
pub mod provisioner;
pub mod reconciler;
pub mod repository_factory;
pub mod termination;
pub mod usage_meter;

pub use bot_service::{
    BotLifecycleService, Collaborators, OrchestratorSettings, SpawnRequest, StandardBotLifecycleService,
};
pub use error::OrchestratorError;
