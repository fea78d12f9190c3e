// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Clawster orchestrator core
//!
//! Provisions bots into confidential enclaves, keeps their recorded status in
//! step with the provider, terminates them and meters their usage.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain, application services, adapters and the HTTP surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
