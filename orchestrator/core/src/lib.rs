// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Xpert orchestrator core
//!
//! Control plane for multi-step, multi-agent task graphs: node scheduling,
//! cancellation fan-in, human-in-the-loop tool confirmation, usage
//! telemetry and event streaming. Model providers, tool backends and
//! persistence are external collaborators behind domain traits.
//!
//! # Architecture
//!
//! - **domain** — types and invariants, no I/O
//! - **application** — services sequencing the collaborators
//! - **infrastructure** — runtime primitives and collaborator adapters
//! - **presentation** — HTTP/SSE surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
