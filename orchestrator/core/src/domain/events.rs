// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::execution::{ExecutionId, ExecutionStatus};
use crate::domain::tool::{ToolCall, ToolOutcome};
use crate::domain::llm::UsageDelta;

/// Events emitted while an execution tree runs.
///
/// The sequence for one execution is totally ordered by publication; stream
/// termination is signalled by connection close, never by a terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        agent_key: String,
        started_at: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_key: String,
        started_at: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_key: String,
        output: serde_json::Value,
        completed_at: DateTime<Utc>,
    },
    /// A branch node picked its route.
    BranchEvaluated {
        execution_id: ExecutionId,
        node_key: String,
        selected_case: Option<String>,
        evaluated_at: DateTime<Utc>,
    },
    /// Chunk of agent message content.
    MessageDelta {
        execution_id: ExecutionId,
        content: String,
    },
    /// A model turn proposed sensitive tool calls and the run is parked on
    /// the confirmation gate.
    ConfirmationRequested {
        execution_id: ExecutionId,
        tool_calls: Vec<ToolCall>,
        requested_at: DateTime<Utc>,
    },
    ToolCallsConfirmed {
        execution_id: ExecutionId,
        tool_calls: Vec<ToolCall>,
        confirmed_at: DateTime<Utc>,
    },
    ToolCallsRejected {
        execution_id: ExecutionId,
        reason: Option<String>,
        rejected_at: DateTime<Utc>,
    },
    /// The gate was torn down by cancellation before any decision. Counts
    /// like a rejection, reported distinctly.
    ToolCallsAborted {
        execution_id: ExecutionId,
        aborted_at: DateTime<Utc>,
    },
    ToolResult {
        execution_id: ExecutionId,
        outcome: ToolOutcome,
        completed_at: DateTime<Utc>,
    },
    UsageUpdated {
        execution_id: ExecutionId,
        delta: UsageDelta,
        tokens: u64,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        final_output: serde_json::Value,
        completed_at: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: ExecutionId,
        reason: Option<String>,
        cancelled_at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// The execution an event belongs to, for per-execution filtering.
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeCompleted { execution_id, .. }
            | ExecutionEvent::BranchEvaluated { execution_id, .. }
            | ExecutionEvent::MessageDelta { execution_id, .. }
            | ExecutionEvent::ConfirmationRequested { execution_id, .. }
            | ExecutionEvent::ToolCallsConfirmed { execution_id, .. }
            | ExecutionEvent::ToolCallsRejected { execution_id, .. }
            | ExecutionEvent::ToolCallsAborted { execution_id, .. }
            | ExecutionEvent::ToolResult { execution_id, .. }
            | ExecutionEvent::UsageUpdated { execution_id, .. }
            | ExecutionEvent::ExecutionCompleted { execution_id, .. }
            | ExecutionEvent::ExecutionFailed { execution_id, .. }
            | ExecutionEvent::ExecutionCancelled { execution_id, .. } => *execution_id,
        }
    }

    /// Terminal events close out the execution's status.
    pub fn terminal_status(&self) -> Option<ExecutionStatus> {
        match self {
            ExecutionEvent::ExecutionCompleted { .. } => Some(ExecutionStatus::Succeeded),
            ExecutionEvent::ExecutionFailed { .. } => Some(ExecutionStatus::Failed),
            ExecutionEvent::ExecutionCancelled { .. } => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Transport framing for one streamed item.
///
/// Keep-alive is a distinct frame kind so consumers can tell it apart from
/// payload events without inspecting payload contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum StreamEvent {
    Event(ExecutionEvent),
    KeepAlive,
}

impl StreamEvent {
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, StreamEvent::KeepAlive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = ExecutionEvent::MessageDelta {
            execution_id: ExecutionId::new(),
            content: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"message_delta\""));
        let deserialized: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(deserialized, ExecutionEvent::MessageDelta { .. }));
    }

    #[test]
    fn test_keep_alive_distinguishable_by_framing() {
        let keep_alive = serde_json::to_string(&StreamEvent::KeepAlive).unwrap();
        assert!(keep_alive.contains("\"frame\":\"keep_alive\""));

        let payload = StreamEvent::Event(ExecutionEvent::ExecutionCancelled {
            execution_id: ExecutionId::new(),
            reason: None,
            cancelled_at: Utc::now(),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"frame\":\"event\""));
    }

    #[test]
    fn test_terminal_status_mapping() {
        let completed = ExecutionEvent::ExecutionCompleted {
            execution_id: ExecutionId::new(),
            final_output: serde_json::Value::Null,
            completed_at: Utc::now(),
        };
        assert_eq!(
            completed.terminal_status(),
            Some(ExecutionStatus::Succeeded)
        );

        let delta = ExecutionEvent::MessageDelta {
            execution_id: ExecutionId::new(),
            content: String::new(),
        };
        assert_eq!(delta.terminal_status(), None);
    }
}
