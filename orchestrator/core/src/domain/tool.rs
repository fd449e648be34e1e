// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool calls and their confirmation lifecycle.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects for proposed tool invocations and the
//!   state machine gating sensitive calls behind human confirmation.

use std::collections::HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use crate::domain::cancellation::CancelSignal;

/// Tool invocation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolInvocationId(pub Uuid);

impl ToolInvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ToolInvocationId {
    fn default() -> Self {
        Self::new()
    }
}

/// A call the model proposes to make: `{id, name, args}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: HashMap<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: HashMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Confirmation state of a proposed invocation.
///
/// `Proposed -> {Confirmed, Rejected}`; a confirmed call moves on to
/// `Executed`, or `Aborted` if the surrounding execution is cancelled while
/// it is still in flight or still waiting. `Rejected` and `Aborted` count
/// the same for accounting but are reported distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Proposed,
    Confirmed,
    Rejected,
    Executed,
    Aborted,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolDomainError {
    #[error("Invalid confirmation transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: ConfirmationState,
        to: ConfirmationState,
    },
    #[error("Arguments are immutable once the invocation leaves Proposed")]
    ArgumentsFrozen,
    #[error("Tool call index {0} out of range")]
    CallIndexOutOfRange(usize),
}

/// A proposed call to an external tool, tracked through confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: ToolInvocationId,
    pub call: ToolCall,
    pub state: ConfirmationState,
    pub proposed_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
}

impl ToolInvocation {
    pub fn new(call: ToolCall) -> Self {
        Self {
            id: ToolInvocationId::new(),
            call,
            state: ConfirmationState::Proposed,
            proposed_at: Utc::now(),
            decided_at: None,
            result: None,
        }
    }

    /// Replace one argument wholesale. Only legal while Proposed.
    pub fn update_argument(&mut self, key: &str, value: Value) -> Result<(), ToolDomainError> {
        if self.state != ConfirmationState::Proposed {
            return Err(ToolDomainError::ArgumentsFrozen);
        }
        self.call.args.insert(key.to_string(), value);
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), ToolDomainError> {
        self.transition(ConfirmationState::Proposed, ConfirmationState::Confirmed)
    }

    pub fn reject(&mut self) -> Result<(), ToolDomainError> {
        self.transition(ConfirmationState::Proposed, ConfirmationState::Rejected)
    }

    pub fn executed(&mut self, result: Value) -> Result<(), ToolDomainError> {
        self.transition(ConfirmationState::Confirmed, ConfirmationState::Executed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Cancellation of the surrounding execution while Proposed or Confirmed.
    pub fn abort(&mut self) -> Result<(), ToolDomainError> {
        match self.state {
            ConfirmationState::Proposed | ConfirmationState::Confirmed => {
                self.state = ConfirmationState::Aborted;
                self.decided_at = Some(Utc::now());
                Ok(())
            }
            from => Err(ToolDomainError::InvalidStateTransition {
                from,
                to: ConfirmationState::Aborted,
            }),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.state,
            ConfirmationState::Rejected | ConfirmationState::Executed | ConfirmationState::Aborted
        )
    }

    fn transition(
        &mut self,
        from: ConfirmationState,
        to: ConfirmationState,
    ) -> Result<(), ToolDomainError> {
        if self.state != from {
            return Err(ToolDomainError::InvalidStateTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}

/// What a tool call came back with, fed to the model as a tool message.
///
/// A rejected call is a structured outcome the agent can adapt to, never an
/// error thrown up the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Completed { call_id: String, result: Value },
    Rejected { call_id: String, reason: Option<String> },
    Failed { call_id: String, error: String },
}

/// Errors from the tool collaborator itself.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("Call cancelled: {0}")]
    Cancelled(String),
}

/// Domain interface for tool execution. The core does not know how a tool
/// reaches its backend; it hands over the call and the cancel signal.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, call: &ToolCall, cancel: CancelSignal) -> Result<Value, ToolError>;
}
