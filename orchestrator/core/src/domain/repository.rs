// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root, following the DDD
//! Repository pattern: one repository per aggregate, interface defined in
//! the domain layer, implemented in `crate::infrastructure::repositories`.
//!
//! The core treats persistence as a key-value collaborator with point
//! lookups; it is called at well-defined checkpoints (record creation,
//! terminal-state transition), never as a live backing store for the
//! in-memory execution tree.

use async_trait::async_trait;
use crate::domain::execution::{Execution, ExecutionId};
use crate::domain::tool::{ToolInvocation, ToolInvocationId};
use crate::domain::workflow::{Workflow, WorkflowId};
use crate::domain::xpert::Xpert;

/// Repository interface for Execution records
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Save execution (create or update)
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError>;

    /// Find execution by ID
    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError>;

    /// Find recent executions (limit results)
    async fn find_recent(&self, limit: usize) -> Result<Vec<Execution>, RepositoryError>;
}

/// Repository interface for ToolInvocation records
#[async_trait]
pub trait ToolInvocationRepository: Send + Sync {
    /// Save invocation (create or update)
    async fn save(&self, invocation: &ToolInvocation) -> Result<(), RepositoryError>;

    /// Find invocation by ID
    async fn find_by_id(
        &self,
        id: ToolInvocationId,
    ) -> Result<Option<ToolInvocation>, RepositoryError>;
}

/// Repository interface for Workflow definitions
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Save workflow (create or update)
    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError>;

    /// Find workflow by ID
    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError>;

    /// Find workflow by name
    async fn find_by_name(&self, name: &str) -> Result<Option<Workflow>, RepositoryError>;

    /// List all workflows
    async fn list_all(&self) -> Result<Vec<Workflow>, RepositoryError>;
}

/// Repository interface for Xpert agent definitions
#[async_trait]
pub trait XpertRepository: Send + Sync {
    /// Save xpert (create or update)
    async fn save(&self, xpert: &Xpert) -> Result<(), RepositoryError>;

    /// Find xpert by its stable key
    async fn find_by_key(&self, key: &str) -> Result<Option<Xpert>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
