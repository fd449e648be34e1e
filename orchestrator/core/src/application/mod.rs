// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatch;
pub mod execution;
pub mod usage;
pub mod workflow_engine;

pub use dispatch::{CommandHandler, CommandPayload, DispatchError, DispatchRegistry};
pub use execution::{register_command_handlers, ExecutionService, StandardExecutionService, StartExecutionRequest};
pub use workflow_engine::{RunOutcome, WorkflowEngine};
