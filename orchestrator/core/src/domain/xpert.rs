// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default step limit for the agent <-> tool loop of one run.
pub const AGENT_RECURSION_LIMIT: u32 = 20;

/// An AI agent definition: role, model, tools and sub-agents.
///
/// Xperts are authored outside this core (studio, DSL import); the engine
/// only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Xpert {
    /// Stable key referenced by workflow nodes and handoffs.
    pub key: String,
    pub title: String,
    /// System instructions prepended to every model call.
    pub instructions: String,
    /// Model name forwarded to the model collaborator.
    pub model: String,
    /// Named toolsets exposed to this agent.
    pub toolsets: Vec<String>,
    /// Keys of sub-agents this agent may hand the turn off to.
    #[serde(default)]
    pub sub_agents: Vec<String>,
    /// Tool names whose invocation must be confirmed by a human first.
    #[serde(default)]
    pub sensitive_tools: Vec<String>,
    /// Cap on model turns within one run; defaults to [`AGENT_RECURSION_LIMIT`].
    #[serde(default)]
    pub recursion_limit: Option<u32>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Xpert {
    pub fn recursion_limit(&self) -> u32 {
        self.recursion_limit.unwrap_or(AGENT_RECURSION_LIMIT)
    }

    /// Whether a proposed call to `tool_name` must pass the confirmation gate.
    pub fn requires_confirmation(&self, tool_name: &str) -> bool {
        self.sensitive_tools.iter().any(|t| t == tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xpert() -> Xpert {
        Xpert {
            key: "primary".to_string(),
            title: "Primary".to_string(),
            instructions: "You are helpful.".to_string(),
            model: "gpt-test".to_string(),
            toolsets: vec!["files".to_string()],
            sub_agents: vec![],
            sensitive_tools: vec!["delete_file".to_string()],
            recursion_limit: None,
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn test_sensitive_tool_policy() {
        let xpert = xpert();
        assert!(xpert.requires_confirmation("delete_file"));
        assert!(!xpert.requires_confirmation("read_file"));
    }

    #[test]
    fn test_recursion_limit_default() {
        assert_eq!(xpert().recursion_limit(), AGENT_RECURSION_LIMIT);
    }
}
