// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Clawster CLI

pub mod config;
pub mod meter;
pub mod runtime;
pub mod serve;

pub use self::config::ConfigCommand;
pub use self::serve::ServeArgs;
