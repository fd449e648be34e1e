// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator configuration.
//!
//! One explicit value injected into the components that need it; the core
//! keeps no ambient global state or feature-toggle singletons.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Inert marker period for idle streams (default 30s).
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    /// Cap on concurrently executing tool calls of one model turn.
    pub max_tool_concurrency: usize,
    /// Deadline for a parked confirmation gate; `None` waits indefinitely.
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Option<Duration>,
    /// Cap on model turns within one run, unless the agent overrides it.
    pub recursion_limit: u32,
    /// Broadcast buffer of the event bus.
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(30),
            max_tool_concurrency: 4,
            confirmation_timeout: None,
            recursion_limit: crate::domain::xpert::AGENT_RECURSION_LIMIT,
            event_buffer: 1000,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
