use crate::application::dispatch::{CommandHandler, CommandPayload, DispatchRegistry};
use crate::application::workflow_engine::WorkflowEngine;
use crate::domain::execution::{Execution, ExecutionId};
use crate::domain::repository::ExecutionRepository;
use crate::domain::cancellation::{CancelReason, CancelSignal, CancellationScope};
use crate::infrastructure::config::OrchestratorConfig;
use crate::infrastructure::confirmation_gate::{ConfirmationGate, PendingConfirmationInfo};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::stream::ExecutionEventStream;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Request to start a top-level run.
#[derive(Debug, Clone, Deserialize)]
pub struct StartExecutionRequest {
    pub workflow: String,
    pub input: Value,
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn start_execution(&self, request: StartExecutionRequest) -> Result<ExecutionId>;
    async fn get_execution(&self, id: ExecutionId) -> Result<Execution>;
    /// Fire the run's cancellation handle. Idempotent for terminal runs.
    async fn cancel_execution(&self, id: ExecutionId, reason: CancelReason) -> Result<()>;
    /// Open the event stream for a run. The stream also tears down when the
    /// run's cancellation handle fires.
    async fn stream_execution(&self, id: ExecutionId) -> Result<ExecutionEventStream>;
    async fn pending_confirmation(&self, id: ExecutionId) -> Option<PendingConfirmationInfo>;
    async fn confirm_tool_calls(&self, id: ExecutionId) -> Result<()>;
    async fn reject_tool_calls(&self, id: ExecutionId, reason: Option<String>) -> Result<()>;
    async fn update_tool_call(
        &self,
        id: ExecutionId,
        call_index: usize,
        key: String,
        value: Value,
    ) -> Result<()>;
}

pub struct StandardExecutionService {
    engine: Arc<WorkflowEngine>,
    execution_repository: Arc<dyn ExecutionRepository>,
    event_bus: Arc<EventBus>,
    confirmation_gate: Arc<ConfirmationGate>,
    config: OrchestratorConfig,
    /// Cancellation handles of live runs.
    active: Arc<tokio::sync::RwLock<HashMap<ExecutionId, CancelSignal>>>,
}

impl StandardExecutionService {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        execution_repository: Arc<dyn ExecutionRepository>,
        event_bus: Arc<EventBus>,
        confirmation_gate: Arc<ConfirmationGate>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            engine,
            execution_repository,
            event_bus,
            confirmation_gate,
            config,
            active: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    async fn pending_for(&self, id: ExecutionId) -> Result<PendingConfirmationInfo> {
        self.confirmation_gate
            .find_by_execution(id)
            .await
            .ok_or_else(|| anyhow!("No pending confirmation for execution {id}"))
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn start_execution(&self, request: StartExecutionRequest) -> Result<ExecutionId> {
        let workflow = self
            .engine
            .get_workflow(&request.workflow)
            .await
            .ok_or_else(|| anyhow!("Workflow '{}' not found", request.workflow))?;

        let root = Execution::new(workflow.metadata.name.clone(), request.input);
        let execution_id = root.id;

        // The run's cancellation root. Upstream sources (client close,
        // deadlines) aggregate into per-call scopes below this one.
        let run_cancel = CancellationScope::aggregate(&[]);
        {
            let mut active = self.active.write().await;
            active.insert(execution_id, run_cancel.clone());
        }

        info!(
            execution_id = %execution_id,
            workflow = %workflow.metadata.name,
            "Starting workflow execution"
        );

        let engine = Arc::clone(&self.engine);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            if let Err(error) = engine.run(&workflow, root, run_cancel).await {
                warn!(execution_id = %execution_id, %error, "Run ended with error");
            }
            let mut active = active.write().await;
            active.remove(&execution_id);
        });

        Ok(execution_id)
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Execution> {
        self.execution_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Execution {id} not found"))
    }

    async fn cancel_execution(&self, id: ExecutionId, reason: CancelReason) -> Result<()> {
        let active = self.active.read().await;
        if let Some(cancel) = active.get(&id) {
            cancel.cancel(reason);
            return Ok(());
        }
        drop(active);

        // Not live: cancelling a finished run is a no-op, an unknown one an
        // error.
        match self.execution_repository.find_by_id(id).await? {
            Some(_) => Ok(()),
            None => bail!("Execution {id} not found"),
        }
    }

    async fn stream_execution(&self, id: ExecutionId) -> Result<ExecutionEventStream> {
        let active = self.active.read().await;
        let cancel = match active.get(&id) {
            Some(cancel) => cancel.clone(),
            // Finished runs emit nothing further; hand back a stream that
            // completes immediately rather than idling on keep-alives.
            None => CancelSignal::cancelled_with(CancelReason::Manual(
                "execution is not live".to_string(),
            )),
        };
        drop(active);

        Ok(ExecutionEventStream::open(
            &self.event_bus,
            id,
            cancel,
            self.config.keep_alive_interval,
        ))
    }

    async fn pending_confirmation(&self, id: ExecutionId) -> Option<PendingConfirmationInfo> {
        self.confirmation_gate.find_by_execution(id).await
    }

    async fn confirm_tool_calls(&self, id: ExecutionId) -> Result<()> {
        let pending = self.pending_for(id).await?;
        self.confirmation_gate.confirm(pending.id).await?;
        Ok(())
    }

    async fn reject_tool_calls(&self, id: ExecutionId, reason: Option<String>) -> Result<()> {
        let pending = self.pending_for(id).await?;
        self.confirmation_gate.reject(pending.id, reason).await?;
        Ok(())
    }

    async fn update_tool_call(
        &self,
        id: ExecutionId,
        call_index: usize,
        key: String,
        value: Value,
    ) -> Result<()> {
        let pending = self.pending_for(id).await?;
        self.confirmation_gate
            .update_argument(pending.id, call_index, &key, value)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Command handlers
// ============================================================================

struct StartExecutionHandler(Arc<dyn ExecutionService>);

#[async_trait]
impl CommandHandler for StartExecutionHandler {
    async fn handle(&self, payload: CommandPayload, _registry: &DispatchRegistry) -> Result<Value> {
        let request: StartExecutionRequest = payload.parse()?;
        let id = self.0.start_execution(request).await?;
        Ok(json!({ "execution_id": id }))
    }
}

#[derive(Deserialize)]
struct ExecutionIdPayload {
    execution_id: ExecutionId,
}

struct GetExecutionHandler(Arc<dyn ExecutionService>);

#[async_trait]
impl CommandHandler for GetExecutionHandler {
    async fn handle(&self, payload: CommandPayload, _registry: &DispatchRegistry) -> Result<Value> {
        let request: ExecutionIdPayload = payload.parse()?;
        let execution = self.0.get_execution(request.execution_id).await?;
        Ok(serde_json::to_value(execution)?)
    }
}

struct CancelExecutionHandler(Arc<dyn ExecutionService>);

#[async_trait]
impl CommandHandler for CancelExecutionHandler {
    async fn handle(&self, payload: CommandPayload, _registry: &DispatchRegistry) -> Result<Value> {
        let request: ExecutionIdPayload = payload.parse()?;
        self.0
            .cancel_execution(request.execution_id, CancelReason::UserCancelled)
            .await?;
        Ok(json!({ "cancelled": true }))
    }
}

struct ConfirmToolCallsHandler(Arc<dyn ExecutionService>);

#[async_trait]
impl CommandHandler for ConfirmToolCallsHandler {
    async fn handle(&self, payload: CommandPayload, _registry: &DispatchRegistry) -> Result<Value> {
        let request: ExecutionIdPayload = payload.parse()?;
        self.0.confirm_tool_calls(request.execution_id).await?;
        Ok(json!({ "confirmed": true }))
    }
}

#[derive(Deserialize)]
struct RejectToolCallsPayload {
    execution_id: ExecutionId,
    #[serde(default)]
    reason: Option<String>,
}

struct RejectToolCallsHandler(Arc<dyn ExecutionService>);

#[async_trait]
impl CommandHandler for RejectToolCallsHandler {
    async fn handle(&self, payload: CommandPayload, _registry: &DispatchRegistry) -> Result<Value> {
        let request: RejectToolCallsPayload = payload.parse()?;
        self.0
            .reject_tool_calls(request.execution_id, request.reason)
            .await?;
        Ok(json!({ "rejected": true }))
    }
}

#[derive(Deserialize)]
struct UpdateToolCallPayload {
    execution_id: ExecutionId,
    call_index: usize,
    key: String,
    value: Value,
}

struct UpdateToolCallHandler(Arc<dyn ExecutionService>);

#[async_trait]
impl CommandHandler for UpdateToolCallHandler {
    async fn handle(&self, payload: CommandPayload, _registry: &DispatchRegistry) -> Result<Value> {
        let request: UpdateToolCallPayload = payload.parse()?;
        self.0
            .update_tool_call(
                request.execution_id,
                request.call_index,
                request.key,
                request.value,
            )
            .await?;
        Ok(json!({ "updated": true }))
    }
}

/// Wire the execution command/query handlers into a registry at startup.
pub fn register_command_handlers(
    registry: &DispatchRegistry,
    service: Arc<dyn ExecutionService>,
) -> Result<()> {
    registry.register(
        "execution.start",
        Arc::new(StartExecutionHandler(Arc::clone(&service))),
    )?;
    registry.register(
        "execution.get",
        Arc::new(GetExecutionHandler(Arc::clone(&service))),
    )?;
    registry.register(
        "execution.cancel",
        Arc::new(CancelExecutionHandler(Arc::clone(&service))),
    )?;
    registry.register(
        "execution.confirm",
        Arc::new(ConfirmToolCallsHandler(Arc::clone(&service))),
    )?;
    registry.register(
        "execution.reject",
        Arc::new(RejectToolCallsHandler(Arc::clone(&service))),
    )?;
    registry.register(
        "execution.update_tool_call",
        Arc::new(UpdateToolCallHandler(service)),
    )?;
    Ok(())
}
