use crate::domain::execution::{Execution, ExecutionId};
use crate::domain::repository::{
    ExecutionRepository, RepositoryError, ToolInvocationRepository, WorkflowRepository,
    XpertRepository,
};
use crate::domain::tool::{ToolInvocation, ToolInvocationId};
use crate::domain::workflow::{Workflow, WorkflowId};
use crate::domain::xpert::Xpert;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn poisoned() -> RepositoryError {
    RepositoryError::Storage("Mutex poisoned".to_string())
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<Mutex<HashMap<ExecutionId, Execution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().map_err(|_| poisoned())?;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let executions = self.executions.lock().map_err(|_| poisoned())?;
        Ok(executions.get(&id).cloned())
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<Execution>, RepositoryError> {
        let executions = self.executions.lock().map_err(|_| poisoned())?;
        let mut all: Vec<Execution> = executions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryToolInvocationRepository {
    invocations: Arc<Mutex<HashMap<ToolInvocationId, ToolInvocation>>>,
}

impl InMemoryToolInvocationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolInvocationRepository for InMemoryToolInvocationRepository {
    async fn save(&self, invocation: &ToolInvocation) -> Result<(), RepositoryError> {
        let mut invocations = self.invocations.lock().map_err(|_| poisoned())?;
        invocations.insert(invocation.id, invocation.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: ToolInvocationId,
    ) -> Result<Option<ToolInvocation>, RepositoryError> {
        let invocations = self.invocations.lock().map_err(|_| poisoned())?;
        Ok(invocations.get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<Mutex<HashMap<WorkflowId, Workflow>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.lock().map_err(|_| poisoned())?;
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = self.workflows.lock().map_err(|_| poisoned())?;
        Ok(workflows.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = self.workflows.lock().map_err(|_| poisoned())?;
        Ok(workflows
            .values()
            .find(|w| w.metadata.name == name)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let workflows = self.workflows.lock().map_err(|_| poisoned())?;
        Ok(workflows.values().cloned().collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryXpertRepository {
    xperts: Arc<Mutex<HashMap<String, Xpert>>>,
}

impl InMemoryXpertRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl XpertRepository for InMemoryXpertRepository {
    async fn save(&self, xpert: &Xpert) -> Result<(), RepositoryError> {
        let mut xperts = self.xperts.lock().map_err(|_| poisoned())?;
        xperts.insert(xpert.key.clone(), xpert.clone());
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Xpert>, RepositoryError> {
        let xperts = self.xperts.lock().map_err(|_| poisoned())?;
        Ok(xperts.get(key).cloned())
    }
}
