// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`clawster-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. No business logic lives here; all real work is delegated to
//! [`crate::application::BotLifecycleService`].
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Owner-scoped bot endpoints and the billing webhook |

pub mod api;
