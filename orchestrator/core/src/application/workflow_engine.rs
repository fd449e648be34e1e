//! Workflow Engine Application Service
//!
//! This module implements the run loop that drives a workflow graph for one
//! top-level execution.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrate node execution (agent turns, tool calls,
//!   branch routing) for an execution tree
//! - **Dependencies:** Domain (Workflow, Execution, Xpert), Infrastructure
//!   (event bus, confirmation gate, cancellation, bounded runner,
//!   repositories)
//!
//! # Run Loop
//!
//! ```text
//! current = workflow.start
//! loop {
//!     match node(current) {
//!         Agent  -> child execution; model/tool loop; state[key] = output
//!         Tool   -> invoke collaborator; state[key] = result
//!         Branch -> evaluate cases against state; jump to target
//!         Answer -> resolve output variable; finish
//!     }
//! }
//! ```
//!
//! Cancellation is checked at every suspension point; a fired signal
//! finalizes the execution as cancelled with partial telemetry intact.

use crate::application::usage::apply_usage;
use crate::domain::events::ExecutionEvent;
use crate::domain::execution::{Execution, ExecutionId, ExecutionTree};
use crate::domain::llm::{ChatMessage, ChatRequest, LanguageModel, ModelTurn};
use crate::domain::repository::{
    ExecutionRepository, ToolInvocationRepository, WorkflowRepository, XpertRepository,
};
use crate::domain::tool::{ToolCall, ToolExecutor, ToolInvocation, ToolOutcome};
use crate::domain::workflow::{
    evaluate_cases, CaseSelection, NodeKind, NodeKey, Workflow, resolve_path,
};
use crate::domain::xpert::Xpert;
use crate::domain::cancellation::{CancelReason, CancelSignal, CancellationScope};
use crate::infrastructure::concurrency::run_with_limit;
use crate::infrastructure::config::OrchestratorConfig;
use crate::infrastructure::confirmation_gate::{ConfirmationGate, GateDecision};
use crate::infrastructure::event_bus::EventBus;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Application Service: WorkflowEngine
// ============================================================================

/// How one run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded(Value),
    Failed(String),
    Cancelled(CancelReason),
}

/// Outcome of one agent node (the inner model/tool loop).
enum AgentTurnOutcome {
    Answer(String),
    Cancelled(CancelReason),
}

/// Outcome of one delegated sub-agent turn.
enum HandoffOutcome {
    Answered(ToolOutcome),
    Cancelled(CancelReason),
}

/// Workflow Engine (Application Service)
pub struct WorkflowEngine {
    workflow_repository: Arc<dyn WorkflowRepository>,
    xpert_repository: Arc<dyn XpertRepository>,
    execution_repository: Arc<dyn ExecutionRepository>,
    tool_invocation_repository: Arc<dyn ToolInvocationRepository>,
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolExecutor>,
    event_bus: Arc<EventBus>,
    confirmation_gate: Arc<ConfirmationGate>,
    config: OrchestratorConfig,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_repository: Arc<dyn WorkflowRepository>,
        xpert_repository: Arc<dyn XpertRepository>,
        execution_repository: Arc<dyn ExecutionRepository>,
        tool_invocation_repository: Arc<dyn ToolInvocationRepository>,
        model: Arc<dyn LanguageModel>,
        tools: Arc<dyn ToolExecutor>,
        event_bus: Arc<EventBus>,
        confirmation_gate: Arc<ConfirmationGate>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            workflow_repository,
            xpert_repository,
            execution_repository,
            tool_invocation_repository,
            model,
            tools,
            event_bus,
            confirmation_gate,
            config,
        }
    }

    // ========================================================================
    // Workflow Management
    // ========================================================================

    /// Register a workflow definition
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<()> {
        info!(
            workflow_id = %workflow.id,
            workflow_name = %workflow.metadata.name,
            "Registering workflow"
        );
        self.workflow_repository.save(&workflow).await?;
        Ok(())
    }

    pub async fn get_workflow(&self, name: &str) -> Option<Workflow> {
        self.workflow_repository.find_by_name(name).await.ok().flatten()
    }

    pub async fn list_workflows(&self) -> Vec<String> {
        match self.workflow_repository.list_all().await {
            Ok(workflows) => workflows.into_iter().map(|w| w.metadata.name).collect(),
            Err(_) => vec![],
        }
    }

    // ========================================================================
    // Run Loop
    // ========================================================================

    /// Drive `root` through `workflow` until a terminal state.
    ///
    /// The execution tree is owned by this call; nothing else writes it
    /// while the run is live. Checkpoints go to the repository at creation
    /// and terminal transitions.
    pub async fn run(
        &self,
        workflow: &Workflow,
        mut root: Execution,
        cancel: CancelSignal,
    ) -> Result<RunOutcome> {
        let root_id = root.id;
        root.start();
        self.checkpoint(&root).await;

        let mut tree = ExecutionTree::new();
        let input = root.inputs.clone();
        let agent_key = root.agent_key.clone();
        tree.insert_root(root);

        self.event_bus.publish(ExecutionEvent::ExecutionStarted {
            execution_id: root_id,
            agent_key,
            started_at: Utc::now(),
        });

        let mut state = json!({ "input": input });
        let outcome = self
            .run_nodes(workflow, root_id, &mut tree, &mut state, &cancel)
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => RunOutcome::Failed(format!("{error:#}")),
        };
        self.finalize(root_id, &mut tree, &outcome).await;
        Ok(outcome)
    }

    async fn run_nodes(
        &self,
        workflow: &Workflow,
        root_id: ExecutionId,
        tree: &mut ExecutionTree,
        state: &mut Value,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome> {
        let mut current = workflow.start.clone();
        let mut steps = 0u32;

        loop {
            if let Some(reason) = cancel.reason() {
                return Ok(RunOutcome::Cancelled(reason));
            }
            steps += 1;
            if steps > self.config.recursion_limit {
                return Ok(RunOutcome::Failed(format!(
                    "Workflow exceeded {} steps",
                    self.config.recursion_limit
                )));
            }

            let node = workflow
                .get_node(&current)
                .ok_or_else(|| anyhow!("Node {} not found", current))?;

            debug!(execution_id = %root_id, node = %current, "Executing workflow node");
            self.event_bus.publish(ExecutionEvent::NodeStarted {
                execution_id: root_id,
                node_key: current.to_string(),
                started_at: Utc::now(),
            });

            match &node.kind {
                NodeKind::Agent { agent_key, next } => {
                    let xpert = self
                        .xpert_repository
                        .find_by_key(agent_key)
                        .await?
                        .ok_or_else(|| anyhow!("Xpert '{}' not found", agent_key))?;

                    let prompt = node_input(state);
                    let child_id =
                        tree.spawn_child(root_id, agent_key.clone(), json!(prompt.clone()))?;
                    tree.get_mut(child_id).expect("child just spawned").start();
                    self.checkpoint_id(tree, child_id).await;

                    // Every nested call gets its own scope derived from the
                    // run's signal; the child can never cancel the parent.
                    let child_cancel = CancellationScope::aggregate(&[cancel.clone()]);
                    let outcome = self
                        .run_agent_loop(&xpert, child_id, tree, &prompt, &child_cancel)
                        .await;

                    match outcome {
                        Ok(AgentTurnOutcome::Answer(answer)) => {
                            let output = json!({ "output": answer });
                            if let Some(child) = tree.get_mut(child_id) {
                                child.succeed(output.clone());
                            }
                            self.checkpoint_id(tree, child_id).await;
                            set_state(state, current.as_str(), output.clone());
                            self.event_bus.publish(ExecutionEvent::NodeCompleted {
                                execution_id: root_id,
                                node_key: current.to_string(),
                                output,
                                completed_at: Utc::now(),
                            });
                            match next {
                                Some(next) => current = next.clone(),
                                None => {
                                    let answer = latest_output(state, current.as_str());
                                    return Ok(RunOutcome::Succeeded(answer));
                                }
                            }
                        }
                        Ok(AgentTurnOutcome::Cancelled(reason)) => {
                            if let Some(child) = tree.get_mut(child_id) {
                                child.cancel(Some(reason.to_string()));
                            }
                            self.checkpoint_id(tree, child_id).await;
                            return Ok(RunOutcome::Cancelled(reason));
                        }
                        Err(error) => {
                            if let Some(child) = tree.get_mut(child_id) {
                                child.fail(format!("{error:#}"));
                            }
                            self.checkpoint_id(tree, child_id).await;
                            return Err(error);
                        }
                    }
                }

                NodeKind::Tool { tool_name, args, next } => {
                    let call = ToolCall::new(
                        format!("{}-{}", current, steps),
                        tool_name.clone(),
                        args.clone(),
                    );
                    // A direct tool step failure propagates with its cause;
                    // there is no internal retry.
                    let result = self
                        .tools
                        .invoke(&call, cancel.clone())
                        .await
                        .with_context(|| format!("Tool '{tool_name}' failed"))?;
                    if let Some(reason) = cancel.reason() {
                        return Ok(RunOutcome::Cancelled(reason));
                    }

                    let output = json!({ "result": result });
                    set_state(state, current.as_str(), output.clone());
                    self.event_bus.publish(ExecutionEvent::NodeCompleted {
                        execution_id: root_id,
                        node_key: current.to_string(),
                        output,
                        completed_at: Utc::now(),
                    });
                    match next {
                        Some(next) => current = next.clone(),
                        None => return Ok(RunOutcome::Succeeded(latest_output(state, current.as_str()))),
                    }
                }

                NodeKind::Branch { cases, fallback } => {
                    let selection = evaluate_cases(cases, state);
                    let (selected_case, target): (Option<String>, Option<&NodeKey>) =
                        match &selection {
                            CaseSelection::Case(case_id) => (
                                Some(case_id.clone()),
                                cases
                                    .iter()
                                    .find(|c| &c.case_id == case_id)
                                    .map(|c| &c.target),
                            ),
                            CaseSelection::Fallback => (None, fallback.as_ref()),
                        };

                    self.event_bus.publish(ExecutionEvent::BranchEvaluated {
                        execution_id: root_id,
                        node_key: current.to_string(),
                        selected_case: selected_case.clone(),
                        evaluated_at: Utc::now(),
                    });

                    match target {
                        Some(target) => current = target.clone(),
                        None => {
                            return Ok(RunOutcome::Failed(format!(
                                "Branch {} matched no case and has no fallback",
                                current
                            )))
                        }
                    }
                }

                NodeKind::Answer { variable } => {
                    let output = resolve_path(state, variable)
                        .cloned()
                        .unwrap_or(Value::Null);
                    self.event_bus.publish(ExecutionEvent::NodeCompleted {
                        execution_id: root_id,
                        node_key: current.to_string(),
                        output: output.clone(),
                        completed_at: Utc::now(),
                    });
                    return Ok(RunOutcome::Succeeded(output));
                }
            }
        }
    }

    // ========================================================================
    // Agent Loop (model <-> tools)
    // ========================================================================

    /// One agent node: call the model, route proposed tool calls through the
    /// sensitive-tool policy and confirmation gate, execute confirmed calls
    /// under the bounded runner, feed results back, repeat until the model
    /// answers or the step budget runs out.
    async fn run_agent_loop(
        &self,
        xpert: &Xpert,
        execution_id: ExecutionId,
        tree: &mut ExecutionTree,
        prompt: &str,
        cancel: &CancelSignal,
    ) -> Result<AgentTurnOutcome> {
        let mut messages = vec![ChatMessage::Human {
            content: prompt.to_string(),
        }];

        for _turn in 0..xpert.recursion_limit() {
            if let Some(reason) = cancel.reason() {
                return Ok(AgentTurnOutcome::Cancelled(reason));
            }

            let request = ChatRequest {
                model: xpert.model.clone(),
                instructions: xpert.instructions.clone(),
                messages: messages.clone(),
                tools: xpert.toolsets.clone(),
            };
            let turn = match self.model.chat(request, cancel.clone()).await {
                Ok(turn) => turn,
                Err(error) => {
                    // A model error racing the cancel signal reports as a
                    // cancellation, not a failure.
                    if let Some(reason) = cancel.reason() {
                        return Ok(AgentTurnOutcome::Cancelled(reason));
                    }
                    return Err(error.into());
                }
            };

            self.record_usage(execution_id, tree, &turn);
            if !turn.content.is_empty() {
                self.event_bus.publish(ExecutionEvent::MessageDelta {
                    execution_id,
                    content: turn.content.clone(),
                });
            }

            if turn.tool_calls.is_empty() {
                return Ok(AgentTurnOutcome::Answer(turn.content));
            }
            messages.push(ChatMessage::Ai {
                content: turn.content.clone(),
            });

            // Human-in-the-loop: a turn containing any sensitive call parks
            // the whole proposed list on the gate.
            let mut tool_calls = turn.tool_calls.clone();
            if tool_calls.iter().any(|c| xpert.requires_confirmation(&c.name)) {
                match self
                    .confirm_tool_calls(execution_id, tool_calls.clone(), cancel)
                    .await
                {
                    GateDecision::Confirmed { tool_calls: edited } => {
                        tool_calls = edited;
                    }
                    GateDecision::Rejected { reason } => {
                        // Report the rejection to the model and keep the
                        // conversation resumable.
                        for call in &tool_calls {
                            self.settle_rejected(call).await;
                            let outcome = ToolOutcome::Rejected {
                                call_id: call.id.clone(),
                                reason: reason.clone(),
                            };
                            self.event_bus.publish(ExecutionEvent::ToolResult {
                                execution_id,
                                outcome: outcome.clone(),
                                completed_at: Utc::now(),
                            });
                            messages.push(ChatMessage::Tool {
                                call_id: call.id.clone(),
                                content: serde_json::to_value(&outcome)?,
                            });
                        }
                        continue;
                    }
                    GateDecision::Aborted => {
                        let reason = cancel
                            .reason()
                            .unwrap_or(CancelReason::DeadlineExceeded);
                        return Ok(AgentTurnOutcome::Cancelled(reason));
                    }
                }
            }

            // Calls naming a sub-agent are handoffs: the turn is delegated
            // to a nested agent run, and its answer comes back as a tool
            // result. Regular calls go to the tool collaborator.
            let (handoffs, regular): (Vec<ToolCall>, Vec<ToolCall>) = tool_calls
                .iter()
                .cloned()
                .partition(|c| xpert.sub_agents.contains(&c.name));

            let mut settled: Vec<(String, ToolOutcome)> = Vec::new();
            for call in &handoffs {
                match self.run_handoff(xpert, execution_id, tree, call, cancel).await? {
                    HandoffOutcome::Answered(outcome) => {
                        settled.push((call.id.clone(), outcome))
                    }
                    HandoffOutcome::Cancelled(reason) => {
                        return Ok(AgentTurnOutcome::Cancelled(reason));
                    }
                }
            }
            for outcome in self.execute_tool_calls(&regular, cancel).await? {
                let call_id = match &outcome {
                    ToolOutcome::Completed { call_id, .. }
                    | ToolOutcome::Rejected { call_id, .. }
                    | ToolOutcome::Failed { call_id, .. } => call_id.clone(),
                };
                settled.push((call_id, outcome));
            }
            if let Some(reason) = cancel.reason() {
                return Ok(AgentTurnOutcome::Cancelled(reason));
            }

            // Feed results back aligned to the proposed order.
            let mut settled: std::collections::HashMap<String, ToolOutcome> =
                settled.into_iter().collect();
            let outcomes: Vec<ToolOutcome> = tool_calls
                .iter()
                .filter_map(|call| settled.remove(&call.id))
                .collect();
            for outcome in outcomes {
                let call_id = match &outcome {
                    ToolOutcome::Completed { call_id, .. }
                    | ToolOutcome::Rejected { call_id, .. }
                    | ToolOutcome::Failed { call_id, .. } => call_id.clone(),
                };
                self.event_bus.publish(ExecutionEvent::ToolResult {
                    execution_id,
                    outcome: outcome.clone(),
                    completed_at: Utc::now(),
                });
                messages.push(ChatMessage::Tool {
                    call_id,
                    content: serde_json::to_value(&outcome)?,
                });
            }
        }

        Err(anyhow!(
            "Agent '{}' exceeded its {}-turn budget",
            xpert.key,
            xpert.recursion_limit()
        ))
    }

    /// Delegate the active turn to a sub-agent. The nested run is a child
    /// execution below the delegating agent's, with a cancellation scope
    /// derived from it; the sub-agent's answer is returned to the model as
    /// an ordinary tool result.
    async fn run_handoff(
        &self,
        xpert: &Xpert,
        execution_id: ExecutionId,
        tree: &mut ExecutionTree,
        call: &ToolCall,
        cancel: &CancelSignal,
    ) -> Result<HandoffOutcome> {
        let sub_xpert = self
            .xpert_repository
            .find_by_key(&call.name)
            .await?
            .ok_or_else(|| anyhow!("Sub-agent '{}' of '{}' not found", call.name, xpert.key))?;

        let prompt = call
            .args
            .get("input")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        debug!(from = %xpert.key, to = %sub_xpert.key, "Handing turn off to sub-agent");
        let child_id = tree.spawn_child(execution_id, call.name.clone(), json!(prompt.clone()))?;
        tree.get_mut(child_id).expect("child just spawned").start();
        self.checkpoint_id(tree, child_id).await;

        let child_cancel = CancellationScope::aggregate(&[cancel.clone()]);
        let outcome = Box::pin(self.run_agent_loop(
            &sub_xpert,
            child_id,
            tree,
            &prompt,
            &child_cancel,
        ))
        .await;

        Ok(match outcome {
            Ok(AgentTurnOutcome::Answer(answer)) => {
                if let Some(child) = tree.get_mut(child_id) {
                    child.succeed(json!({ "output": answer.clone() }));
                }
                self.checkpoint_id(tree, child_id).await;
                HandoffOutcome::Answered(ToolOutcome::Completed {
                    call_id: call.id.clone(),
                    result: json!(answer),
                })
            }
            Ok(AgentTurnOutcome::Cancelled(reason)) => {
                if let Some(child) = tree.get_mut(child_id) {
                    child.cancel(Some(reason.to_string()));
                }
                self.checkpoint_id(tree, child_id).await;
                HandoffOutcome::Cancelled(reason)
            }
            Err(error) => {
                if let Some(child) = tree.get_mut(child_id) {
                    child.fail(format!("{error:#}"));
                }
                self.checkpoint_id(tree, child_id).await;
                // Like a failing tool: reported to the delegating model,
                // not thrown up the stack.
                HandoffOutcome::Answered(ToolOutcome::Failed {
                    call_id: call.id.clone(),
                    error: format!("{error:#}"),
                })
            }
        })
    }

    /// Park the run on the confirmation gate, with the configured decision
    /// deadline folded in as one more cancellation source.
    async fn confirm_tool_calls(
        &self,
        execution_id: ExecutionId,
        tool_calls: Vec<ToolCall>,
        cancel: &CancelSignal,
    ) -> GateDecision {
        // Register the proposal before announcing it, so a listener acting
        // on the event immediately can already address the gate.
        let pending = self
            .confirmation_gate
            .propose(execution_id, tool_calls.clone())
            .await;
        self.event_bus.publish(ExecutionEvent::ConfirmationRequested {
            execution_id,
            tool_calls,
            requested_at: Utc::now(),
        });

        let gate_cancel = match self.config.confirmation_timeout {
            Some(timeout) => CancellationScope::aggregate(&[
                cancel.clone(),
                CancelSignal::deadline(timeout),
            ]),
            None => CancellationScope::aggregate(&[cancel.clone()]),
        };

        let decision = self.confirmation_gate.wait(pending, gate_cancel).await;

        match &decision {
            GateDecision::Confirmed { tool_calls } => {
                self.event_bus.publish(ExecutionEvent::ToolCallsConfirmed {
                    execution_id,
                    tool_calls: tool_calls.clone(),
                    confirmed_at: Utc::now(),
                });
            }
            GateDecision::Rejected { reason } => {
                self.event_bus.publish(ExecutionEvent::ToolCallsRejected {
                    execution_id,
                    reason: reason.clone(),
                    rejected_at: Utc::now(),
                });
            }
            GateDecision::Aborted => {
                self.event_bus.publish(ExecutionEvent::ToolCallsAborted {
                    execution_id,
                    aborted_at: Utc::now(),
                });
            }
        }
        decision
    }

    /// Execute one turn's confirmed calls with bounded concurrency.
    /// Outcomes come back aligned to the proposed order. A failing tool
    /// becomes a structured failed outcome for the model; it neither
    /// cancels nor reorders its siblings.
    async fn execute_tool_calls(
        &self,
        tool_calls: &[ToolCall],
        cancel: &CancelSignal,
    ) -> Result<Vec<ToolOutcome>> {
        let factories: Vec<_> = tool_calls
            .iter()
            .cloned()
            .map(|call| {
                let tools = Arc::clone(&self.tools);
                let cancel = cancel.clone();
                move || async move {
                    let outcome = match tools.invoke(&call, cancel).await {
                        Ok(result) => ToolOutcome::Completed {
                            call_id: call.id.clone(),
                            result,
                        },
                        Err(error) => {
                            warn!(tool = %call.name, %error, "Tool call failed");
                            ToolOutcome::Failed {
                                call_id: call.id.clone(),
                                error: error.to_string(),
                            }
                        }
                    };
                    Ok((call, outcome))
                }
            })
            .collect();

        let settled = run_with_limit(factories, self.config.max_tool_concurrency)
            .await
            .map_err(anyhow::Error::new)?;

        let mut outcomes = Vec::with_capacity(settled.len());
        for (call, outcome) in settled {
            self.settle_executed(&call, &outcome).await;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    // ========================================================================
    // Telemetry & checkpoints
    // ========================================================================

    fn record_usage(&self, execution_id: ExecutionId, tree: &mut ExecutionTree, turn: &ModelTurn) {
        if let Some(execution) = tree.get_mut(execution_id) {
            apply_usage(execution, &turn.usage);
            self.event_bus.publish(ExecutionEvent::UsageUpdated {
                execution_id,
                delta: turn.usage.clone(),
                tokens: execution.tokens,
            });
        }
    }

    /// Persist an invocation record for an executed (or failed) call.
    async fn settle_executed(&self, call: &ToolCall, outcome: &ToolOutcome) {
        let mut invocation = ToolInvocation::new(call.clone());
        let settled = invocation.confirm().and_then(|_| {
            let result = match outcome {
                ToolOutcome::Completed { result, .. } => result.clone(),
                ToolOutcome::Failed { error, .. } => json!({ "error": error }),
                ToolOutcome::Rejected { reason, .. } => json!({ "rejected": reason }),
            };
            invocation.executed(result)
        });
        if settled.is_ok() {
            if let Err(error) = self.tool_invocation_repository.save(&invocation).await {
                warn!(%error, "Failed to persist tool invocation");
            }
        }
    }

    async fn settle_rejected(&self, call: &ToolCall) {
        let mut invocation = ToolInvocation::new(call.clone());
        if invocation.reject().is_ok() {
            if let Err(error) = self.tool_invocation_repository.save(&invocation).await {
                warn!(%error, "Failed to persist tool invocation");
            }
        }
    }

    async fn checkpoint(&self, execution: &Execution) {
        if let Err(error) = self.execution_repository.save(execution).await {
            warn!(execution_id = %execution.id, %error, "Failed to persist execution");
        }
    }

    async fn checkpoint_id(&self, tree: &ExecutionTree, id: ExecutionId) {
        if let Some(execution) = tree.get(id) {
            self.checkpoint(execution).await;
        }
    }

    async fn finalize(&self, root_id: ExecutionId, tree: &mut ExecutionTree, outcome: &RunOutcome) {
        // Children still live when the run ends share the root's fate: the
        // tree invariant is that a child's lifetime is contained in its
        // parent's.
        let live_children: Vec<ExecutionId> = tree
            .get(root_id)
            .map(|root| {
                root.children
                    .iter()
                    .copied()
                    .filter(|id| tree.get(*id).map(|c| !c.is_terminal()).unwrap_or(false))
                    .collect()
            })
            .unwrap_or_default();

        for child_id in live_children {
            if let Some(child) = tree.get_mut(child_id) {
                match outcome {
                    RunOutcome::Succeeded(_) => child.succeed(Value::Null),
                    RunOutcome::Failed(reason) => child.fail(reason.clone()),
                    RunOutcome::Cancelled(reason) => child.cancel(Some(reason.to_string())),
                }
            }
            self.checkpoint_id(tree, child_id).await;
        }

        if let Some(root) = tree.get_mut(root_id) {
            match outcome {
                RunOutcome::Succeeded(output) => {
                    root.succeed(output.clone());
                    self.event_bus.publish(ExecutionEvent::ExecutionCompleted {
                        execution_id: root_id,
                        final_output: output.clone(),
                        completed_at: Utc::now(),
                    });
                }
                RunOutcome::Failed(reason) => {
                    root.fail(reason.clone());
                    self.event_bus.publish(ExecutionEvent::ExecutionFailed {
                        execution_id: root_id,
                        reason: reason.clone(),
                        failed_at: Utc::now(),
                    });
                }
                RunOutcome::Cancelled(reason) => {
                    root.cancel(Some(reason.to_string()));
                    self.event_bus.publish(ExecutionEvent::ExecutionCancelled {
                        execution_id: root_id,
                        reason: Some(reason.to_string()),
                        cancelled_at: Utc::now(),
                    });
                }
            }
            info!(
                execution_id = %root_id,
                status = ?tree.get(root_id).map(|e| e.status),
                tokens = tree.aggregate_tokens(root_id),
                "Run finished"
            );
        }
        self.checkpoint_id(tree, root_id).await;
    }
}

// ============================================================================
// State helpers
// ============================================================================

fn set_state(state: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = state {
        map.insert(key.to_string(), value.clone());
        // The latest node output doubles as the next agent's input.
        map.insert("latest".to_string(), value);
    }
}

fn latest_output(state: &Value, key: &str) -> Value {
    resolve_path(state, &format!("{key}.output"))
        .or_else(|| resolve_path(state, key))
        .cloned()
        .unwrap_or(Value::Null)
}

/// The prompt an agent node sees: the previous node's textual output, or
/// the run input for the first node.
fn node_input(state: &Value) -> String {
    let latest = resolve_path(state, "latest.output")
        .or_else(|| resolve_path(state, "latest.result"))
        .or_else(|| resolve_path(state, "input"));
    match latest {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
