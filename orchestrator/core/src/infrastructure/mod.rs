// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod crypto;
pub mod db;
pub mod event_bus;
pub mod phala;
pub mod probe;
pub mod repositories;
pub mod stripe;

pub use event_bus::EventBus;
