// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Phala Cloud provisioning adapter and compose descriptor rendering

pub mod client;
pub mod compose;

pub use client::PhalaClient;
