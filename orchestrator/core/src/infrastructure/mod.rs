// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod concurrency;
pub mod config;
pub mod confirmation_gate;
pub mod event_bus;
pub mod repositories;
pub mod stream;
pub mod workflow_parser;

pub use confirmation_gate::{ConfirmationGate, GateDecision, PendingConfirmationInfo};
