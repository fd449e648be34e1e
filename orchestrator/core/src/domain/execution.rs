use uuid::Uuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One traced run of an agent or workflow node.
///
/// Executions form a tree rooted at the top-level conversation turn; nested
/// agent and tool invocations are child records. Telemetry counters are only
/// mutable while the execution is `Running` and freeze at a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    /// Key of the agent (or workflow node) this run belongs to.
    pub agent_key: String,
    pub status: ExecutionStatus,
    /// Accumulated prompt-side tokens.
    pub input_tokens: u64,
    /// Accumulated completion-side tokens.
    pub output_tokens: u64,
    /// Accumulated total tokens.
    pub tokens: u64,
    /// Accumulated prompt-side price.
    pub input_price: f64,
    /// Accumulated completion-side price.
    pub output_price: f64,
    /// Accumulated total price.
    pub total_price: f64,
    /// Pricing context of the most recent usage report, not a running sum.
    pub input_unit_price: f64,
    pub input_price_unit: f64,
    pub output_unit_price: f64,
    pub output_price_unit: f64,
    pub currency: Option<String>,
    /// Latency of the most recent model response, in seconds.
    pub response_latency: f64,
    pub parent_id: Option<ExecutionId>,
    /// Child executions in spawn order.
    pub children: Vec<ExecutionId>,
    pub inputs: serde_json::Value,
    pub outputs: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Execution {0} not found")]
    NotFound(ExecutionId),
    #[error("Execution {0} is not running")]
    NotRunning(ExecutionId),
    #[error("Execution {0} already reached terminal status {1:?}")]
    AlreadyTerminal(ExecutionId, ExecutionStatus),
    #[error("Parent execution {0} is no longer live, cannot spawn a child")]
    ParentNotLive(ExecutionId),
}

impl Execution {
    pub fn new(agent_key: impl Into<String>, inputs: serde_json::Value) -> Self {
        Self {
            id: ExecutionId::new(),
            agent_key: agent_key.into(),
            status: ExecutionStatus::Pending,
            input_tokens: 0,
            output_tokens: 0,
            tokens: 0,
            input_price: 0.0,
            output_price: 0.0,
            total_price: 0.0,
            input_unit_price: 0.0,
            input_price_unit: 0.0,
            output_unit_price: 0.0,
            output_price_unit: 0.0,
            currency: None,
            response_latency: 0.0,
            parent_id: None,
            children: Vec::new(),
            inputs,
            outputs: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, outputs: serde_json::Value) {
        self.status = ExecutionStatus::Succeeded;
        self.outputs = Some(outputs);
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    /// Cancellation keeps whatever telemetry accumulated before the signal
    /// fired; it is a terminal status, not an error.
    pub fn cancel(&mut self, reason: Option<String>) {
        self.status = ExecutionStatus::Cancelled;
        self.error = reason;
        self.ended_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// In-memory execution tree addressed by identifiers.
///
/// The tree is the live representation of one top-level run; persistence is
/// a collaborator called at checkpoints, not a backing store for this graph.
#[derive(Debug, Default)]
pub struct ExecutionTree {
    nodes: HashMap<ExecutionId, Execution>,
    root: Option<ExecutionId>,
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the root execution. Subsequent inserts go through `spawn_child`.
    pub fn insert_root(&mut self, execution: Execution) -> ExecutionId {
        let id = execution.id;
        self.root = Some(id);
        self.nodes.insert(id, execution);
        id
    }

    pub fn root(&self) -> Option<ExecutionId> {
        self.root
    }

    /// Create a child execution under `parent`. A child's lifetime is
    /// contained within its parent's, so spawning under a terminal parent
    /// is refused.
    pub fn spawn_child(
        &mut self,
        parent: ExecutionId,
        agent_key: impl Into<String>,
        inputs: serde_json::Value,
    ) -> Result<ExecutionId, ExecutionError> {
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(ExecutionError::NotFound(parent))?;
        if parent_node.is_terminal() {
            return Err(ExecutionError::ParentNotLive(parent));
        }

        let mut child = Execution::new(agent_key, inputs);
        child.parent_id = Some(parent);
        let child_id = child.id;
        parent_node.children.push(child_id);
        self.nodes.insert(child_id, child);
        Ok(child_id)
    }

    pub fn get(&self, id: ExecutionId) -> Option<&Execution> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ExecutionId) -> Option<&mut Execution> {
        self.nodes.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total tokens of an execution including its whole subtree.
    pub fn aggregate_tokens(&self, id: ExecutionId) -> u64 {
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        node.tokens
            + node
                .children
                .iter()
                .map(|child| self.aggregate_tokens(*child))
                .sum::<u64>()
    }

    /// Total price of an execution including its whole subtree.
    pub fn aggregate_price(&self, id: ExecutionId) -> f64 {
        let Some(node) = self.nodes.get(&id) else {
            return 0.0;
        };
        node.total_price
            + node
                .children
                .iter()
                .map(|child| self.aggregate_price(*child))
                .sum::<f64>()
    }

    /// Depth of `id` below the root (root is 0).
    pub fn depth(&self, id: ExecutionId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(&id).and_then(|n| n.parent_id);
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes.get(&parent).and_then(|n| n.parent_id);
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_lifecycle() {
        let mut execution = Execution::new("agent-1", serde_json::json!({"input": "hi"}));
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(!execution.is_terminal());

        execution.start();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.started_at.is_some());

        execution.succeed(serde_json::json!({"output": "done"}));
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert!(execution.is_terminal());
        assert!(execution.ended_at.is_some());
    }

    #[test]
    fn test_cancel_keeps_partial_telemetry() {
        let mut execution = Execution::new("agent-1", serde_json::Value::Null);
        execution.start();
        execution.tokens = 42;
        execution.total_price = 0.5;

        execution.cancel(Some("client disconnected".to_string()));
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(execution.tokens, 42);
        assert_eq!(execution.total_price, 0.5);
    }

    #[test]
    fn test_tree_spawn_child_links_parent() {
        let mut tree = ExecutionTree::new();
        let mut root = Execution::new("root", serde_json::Value::Null);
        root.start();
        let root_id = tree.insert_root(root);

        let child_id = tree
            .spawn_child(root_id, "child", serde_json::Value::Null)
            .unwrap();

        assert_eq!(tree.get(child_id).unwrap().parent_id, Some(root_id));
        assert_eq!(tree.get(root_id).unwrap().children, vec![child_id]);
        assert_eq!(tree.depth(child_id), 1);
        assert_eq!(tree.depth(root_id), 0);
    }

    #[test]
    fn test_tree_refuses_child_under_terminal_parent() {
        let mut tree = ExecutionTree::new();
        let mut root = Execution::new("root", serde_json::Value::Null);
        root.start();
        let root_id = tree.insert_root(root);
        tree.get_mut(root_id).unwrap().succeed(serde_json::Value::Null);

        let result = tree.spawn_child(root_id, "child", serde_json::Value::Null);
        assert!(matches!(result, Err(ExecutionError::ParentNotLive(_))));
    }

    #[test]
    fn test_aggregate_tokens_sums_subtree() {
        let mut tree = ExecutionTree::new();
        let mut root = Execution::new("root", serde_json::Value::Null);
        root.start();
        let root_id = tree.insert_root(root);
        tree.get_mut(root_id).unwrap().tokens = 10;

        let child_id = tree
            .spawn_child(root_id, "child", serde_json::Value::Null)
            .unwrap();
        tree.get_mut(child_id).unwrap().start();
        tree.get_mut(child_id).unwrap().tokens = 5;

        let grandchild_id = tree
            .spawn_child(child_id, "grandchild", serde_json::Value::Null)
            .unwrap();
        tree.get_mut(grandchild_id).unwrap().tokens = 3;

        assert_eq!(tree.aggregate_tokens(root_id), 18);
        assert_eq!(tree.aggregate_tokens(child_id), 8);
        assert_eq!(tree.aggregate_tokens(grandchild_id), 3);
    }
}
