// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Bot aggregate, collaborator contracts and the platform configuration schema.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits; no I/O

pub mod bot;
pub mod secrets;
pub mod provisioning;
pub mod billing;
pub mod usage;
pub mod events;
pub mod repository;
pub mod platform_config;
