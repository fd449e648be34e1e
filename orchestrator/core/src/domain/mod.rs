// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cancellation;
pub mod execution;
pub mod events;
pub mod llm;
pub mod repository;
pub mod tool;
pub mod workflow;
pub mod xpert;
