// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Confirmation Gate - Infrastructure for human-in-the-loop tool approval
//!
//! Holds proposed tool calls until the user confirms, edits or rejects
//! them. A gate parked on a cancelled execution aborts without emitting a
//! confirm/reject decision.

use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::execution::ExecutionId;
use crate::domain::tool::{ToolCall, ToolInvocation};
use crate::domain::cancellation::CancelSignal;

/// Outcome of one parked confirmation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// User approved; carries the (possibly edited) tool-call list.
    Confirmed { tool_calls: Vec<ToolCall> },
    /// User declined. Terminal for this gate instance.
    Rejected { reason: Option<String> },
    /// The surrounding execution was cancelled while the request was
    /// pending. Accounted like a rejection, reported distinctly.
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Confirmation request {0} not found or already decided")]
    NotFound(Uuid),
    #[error("Tool call index {0} out of range")]
    CallIndexOutOfRange(usize),
    #[error(transparent)]
    Domain(#[from] crate::domain::tool::ToolDomainError),
}

/// Handle for a registered proposal, redeemed by [`ConfirmationGate::wait`].
pub struct PendingDecision {
    request_id: Uuid,
    response_rx: oneshot::Receiver<GateDecision>,
}

impl PendingDecision {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

/// A pending confirmation request
struct PendingConfirmation {
    id: Uuid,
    execution_id: ExecutionId,
    invocations: Vec<ToolInvocation>,
    created_at: DateTime<Utc>,
    response_tx: oneshot::Sender<GateDecision>,
}

/// Information about a pending request (for serialization/API)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PendingConfirmationInfo {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

/// Confirmation gate for sensitive tool invocations
pub struct ConfirmationGate {
    pending: Arc<RwLock<HashMap<Uuid, PendingConfirmation>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a proposal and make it addressable (listable, editable)
    /// before anyone is told about it. The caller then parks on [`wait`].
    ///
    /// [`wait`]: ConfirmationGate::wait
    pub async fn propose(
        &self,
        execution_id: ExecutionId,
        tool_calls: Vec<ToolCall>,
    ) -> PendingDecision {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        let request = PendingConfirmation {
            id: request_id,
            execution_id,
            invocations: tool_calls.into_iter().map(ToolInvocation::new).collect(),
            created_at: Utc::now(),
            response_tx: tx,
        };

        {
            let mut pending = self.pending.write().await;
            pending.insert(request_id, request);
        }

        info!(
            request_id = %request_id,
            execution_id = %execution_id,
            "Tool call confirmation requested"
        );

        PendingDecision {
            request_id,
            response_rx: rx,
        }
    }

    /// Park until the user decides or the cancel signal fires. The
    /// proposed calls stay editable while parked.
    pub async fn wait(&self, pending: PendingDecision, cancel: CancelSignal) -> GateDecision {
        let request_id = pending.request_id;
        tokio::select! {
            decision = pending.response_rx => {
                // Channel closed without a decision behaves like an abort.
                decision.unwrap_or(GateDecision::Aborted)
            }
            reason = cancel.cancelled() => {
                debug!(request_id = %request_id, %reason, "Confirmation gate aborted by cancellation");
                self.abort(request_id).await;
                GateDecision::Aborted
            }
        }
    }

    /// Propose and park in one step.
    pub async fn await_decision(
        &self,
        execution_id: ExecutionId,
        tool_calls: Vec<ToolCall>,
        cancel: CancelSignal,
    ) -> GateDecision {
        let pending = self.propose(execution_id, tool_calls).await;
        self.wait(pending, cancel).await
    }

    /// Replace one argument of one proposed call, addressed by position and
    /// key. Whole-value replacement, never a merge.
    pub async fn update_argument(
        &self,
        request_id: Uuid,
        call_index: usize,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), GateError> {
        let mut pending = self.pending.write().await;
        let request = pending
            .get_mut(&request_id)
            .ok_or(GateError::NotFound(request_id))?;
        let invocation = request
            .invocations
            .get_mut(call_index)
            .ok_or(GateError::CallIndexOutOfRange(call_index))?;
        invocation.update_argument(key, value)?;
        Ok(())
    }

    /// Approve a pending request, resolving the parked caller with the
    /// edited call list. Terminal: the request cannot be decided again.
    pub async fn confirm(&self, request_id: Uuid) -> Result<(), GateError> {
        let mut pending = self.pending.write().await;
        let mut request = pending
            .remove(&request_id)
            .ok_or(GateError::NotFound(request_id))?;

        for invocation in &mut request.invocations {
            invocation.confirm()?;
        }
        let tool_calls = request
            .invocations
            .iter()
            .map(|inv| inv.call.clone())
            .collect();

        info!(request_id = %request_id, "Tool calls confirmed");

        // Ignore error if the waiting side already went away.
        let _ = request.response_tx.send(GateDecision::Confirmed { tool_calls });
        Ok(())
    }

    /// Decline a pending request. Terminal.
    pub async fn reject(&self, request_id: Uuid, reason: Option<String>) -> Result<(), GateError> {
        let mut pending = self.pending.write().await;
        let mut request = pending
            .remove(&request_id)
            .ok_or(GateError::NotFound(request_id))?;

        for invocation in &mut request.invocations {
            invocation.reject()?;
        }

        info!(request_id = %request_id, reason = ?reason, "Tool calls rejected");

        let _ = request.response_tx.send(GateDecision::Rejected { reason });
        Ok(())
    }

    /// Tear a request down without a user decision.
    async fn abort(&self, request_id: Uuid) {
        let mut pending = self.pending.write().await;
        if let Some(mut request) = pending.remove(&request_id) {
            for invocation in &mut request.invocations {
                let _ = invocation.abort();
            }
            // No decision is sent; the parked caller already returned.
        }
    }

    /// Get list of pending requests (for UI display)
    pub async fn list_pending(&self) -> Vec<PendingConfirmationInfo> {
        let pending = self.pending.read().await;
        pending.values().map(Self::info).collect()
    }

    /// Find the pending request parked on an execution, if any.
    pub async fn find_by_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Option<PendingConfirmationInfo> {
        let pending = self.pending.read().await;
        pending
            .values()
            .find(|req| req.execution_id == execution_id)
            .map(Self::info)
    }

    fn info(request: &PendingConfirmation) -> PendingConfirmationInfo {
        PendingConfirmationInfo {
            id: request.id,
            execution_id: request.execution_id,
            tool_calls: request.invocations.iter().map(|inv| inv.call.clone()).collect(),
            created_at: request.created_at,
        }
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cancellation::CancelReason;
    use std::collections::HashMap as StdHashMap;

    fn calls() -> Vec<ToolCall> {
        let mut args = StdHashMap::new();
        args.insert("path".to_string(), serde_json::json!("/tmp/out"));
        vec![ToolCall::new("call-1", "write_file", args)]
    }

    #[tokio::test]
    async fn test_confirm_carries_edited_arguments() {
        let gate = Arc::new(ConfirmationGate::new());
        let execution_id = ExecutionId::new();

        let decider = gate.clone();
        tokio::spawn(async move {
            // Wait for the request to appear, edit, then confirm.
            loop {
                if let Some(req) = decider.list_pending().await.first().cloned() {
                    decider
                        .update_argument(req.id, 0, "path", serde_json::json!("/tmp/edited"))
                        .await
                        .unwrap();
                    decider.confirm(req.id).await.unwrap();
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let decision = gate
            .await_decision(execution_id, calls(), CancelSignal::new())
            .await;

        match decision {
            GateDecision::Confirmed { tool_calls } => {
                assert_eq!(tool_calls[0].args["path"], serde_json::json!("/tmp/edited"));
            }
            other => panic!("Expected confirmation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_flow() {
        let gate = Arc::new(ConfirmationGate::new());
        let execution_id = ExecutionId::new();

        let decider = gate.clone();
        tokio::spawn(async move {
            loop {
                if let Some(req) = decider.list_pending().await.first().cloned() {
                    decider
                        .reject(req.id, Some("not allowed".to_string()))
                        .await
                        .unwrap();
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let decision = gate
            .await_decision(execution_id, calls(), CancelSignal::new())
            .await;
        assert_eq!(
            decision,
            GateDecision::Rejected {
                reason: Some("not allowed".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_aborts_without_decision() {
        let gate = Arc::new(ConfirmationGate::new());
        let execution_id = ExecutionId::new();
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel(CancelReason::ClientDisconnected);
        });

        let decision = gate.await_decision(execution_id, calls(), cancel).await;
        assert_eq!(decision, GateDecision::Aborted);
        assert!(gate.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_decision_after_confirm() {
        let gate = Arc::new(ConfirmationGate::new());
        let execution_id = ExecutionId::new();

        let decider = gate.clone();
        let handle = tokio::spawn(async move {
            loop {
                if let Some(req) = decider.list_pending().await.first().cloned() {
                    decider.confirm(req.id).await.unwrap();
                    // Request is gone: further decisions and edits fail.
                    assert!(matches!(
                        decider.reject(req.id, None).await,
                        Err(GateError::NotFound(_))
                    ));
                    assert!(matches!(
                        decider
                            .update_argument(req.id, 0, "path", serde_json::json!("x"))
                            .await,
                        Err(GateError::NotFound(_))
                    ));
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let decision = gate
            .await_decision(execution_id, calls(), CancelSignal::new())
            .await;
        assert!(matches!(decision, GateDecision::Confirmed { .. }));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_update_argument_index_out_of_range() {
        let gate = Arc::new(ConfirmationGate::new());
        let execution_id = ExecutionId::new();

        let decider = gate.clone();
        tokio::spawn(async move {
            loop {
                if let Some(req) = decider.list_pending().await.first().cloned() {
                    let err = decider
                        .update_argument(req.id, 5, "path", serde_json::json!("x"))
                        .await;
                    assert!(matches!(err, Err(GateError::CallIndexOutOfRange(5))));
                    decider.confirm(req.id).await.unwrap();
                    break;
                }
                tokio::task::yield_now().await;
            }
        });

        let _ = gate
            .await_decision(execution_id, calls(), CancelSignal::new())
            .await;
    }
}
