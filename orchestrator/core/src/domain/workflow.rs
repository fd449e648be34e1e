//! Workflow Domain Model
//!
//! This module defines the domain entities and value objects for agent
//! workflows: a graph of nodes (agent steps, tool steps, branch routers,
//! answers) plus the branch/case/condition model the router evaluates.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Execution Context
//! - **Aggregate Root:** Workflow
//!
//! # Design Principles
//!
//! 1. **Immutability:** Workflow definitions are immutable once loaded
//! 2. **Type Safety:** Strongly typed nodes, cases and conditions
//! 3. **Self-Validating:** Constructors enforce invariants
//! 4. **Pure evaluation:** Branch evaluation is side-effect-free and
//!    idempotent; the same state always selects the same case

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier for a Workflow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique key for a node within a workflow (e.g., "Agent_primary", "Router_1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Result<Self, WorkflowError> {
        let key = key.into();
        if key.is_empty() {
            return Err(WorkflowError::InvalidNodeKey(
                "Node key cannot be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Aggregate Root: Workflow
// ============================================================================

/// Workflow Aggregate Root
///
/// # Invariants
/// - Must have at least one node
/// - `start` must reference an existing node
/// - Every `next` edge and every branch case target must reference an
///   existing node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub metadata: WorkflowMetadata,
    pub start: NodeKey,
    pub nodes: HashMap<NodeKey, WorkflowNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl Workflow {
    /// Create a new Workflow with validation
    pub fn new(
        metadata: WorkflowMetadata,
        start: NodeKey,
        nodes: HashMap<NodeKey, WorkflowNode>,
    ) -> Result<Self, WorkflowError> {
        if nodes.is_empty() {
            return Err(WorkflowError::NoNodes);
        }
        if !nodes.contains_key(&start) {
            return Err(WorkflowError::UnknownTarget(start.clone()));
        }
        for node in nodes.values() {
            for target in node.targets() {
                if !nodes.contains_key(target) {
                    return Err(WorkflowError::UnknownTarget(target.clone()));
                }
            }
        }
        Ok(Self {
            id: WorkflowId::new(),
            metadata,
            start,
            nodes,
        })
    }

    pub fn get_node(&self, key: &NodeKey) -> Option<&WorkflowNode> {
        self.nodes.get(key)
    }
}

/// A node of the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub key: NodeKey,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Run an agent turn (model loop with tools) and store its answer.
    Agent {
        agent_key: String,
        next: Option<NodeKey>,
    },
    /// Invoke one named tool directly with arguments rendered from state.
    Tool {
        tool_name: String,
        args: HashMap<String, Value>,
        next: Option<NodeKey>,
    },
    /// Route by evaluating ordered cases against the run state.
    Branch {
        cases: Vec<BranchCase>,
        /// Taken when no case matches.
        fallback: Option<NodeKey>,
    },
    /// Terminal node producing the run output from a state variable.
    Answer { variable: String },
}

impl WorkflowNode {
    /// All node keys this node can hand control to.
    pub fn targets(&self) -> Vec<&NodeKey> {
        match &self.kind {
            NodeKind::Agent { next, .. } | NodeKind::Tool { next, .. } => {
                next.iter().collect()
            }
            NodeKind::Branch { cases, fallback } => cases
                .iter()
                .map(|c| &c.target)
                .chain(fallback.iter())
                .collect(),
            NodeKind::Answer { .. } => Vec::new(),
        }
    }
}

// ============================================================================
// Branch / Case / Condition
// ============================================================================

/// One case of a branch node: a logical operator over ordered conditions
/// plus the node to route to when the case is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCase {
    pub case_id: String,
    pub logical_operator: LogicalOperator,
    pub conditions: Vec<CaseCondition>,
    pub target: NodeKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseCondition {
    /// Dotted path into the run state, e.g. `agent.output.score`.
    pub variable_selector: String,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Empty,
    NotEmpty,
    IsTrue,
    IsFalse,
}

/// Outcome of evaluating a branch node against one run state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseSelection {
    Case(String),
    Fallback,
}

/// Evaluate cases in declaration order; the first case whose condition set
/// satisfies its operator wins. `And` over zero conditions is vacuously
/// true; `Or` over zero conditions is false.
pub fn evaluate_cases(cases: &[BranchCase], state: &Value) -> CaseSelection {
    for case in cases {
        if evaluate_case(case, state) {
            return CaseSelection::Case(case.case_id.clone());
        }
    }
    CaseSelection::Fallback
}

pub fn evaluate_case(case: &BranchCase, state: &Value) -> bool {
    match case.logical_operator {
        LogicalOperator::And => case.conditions.iter().all(|c| evaluate_condition(c, state)),
        LogicalOperator::Or => case.conditions.iter().any(|c| evaluate_condition(c, state)),
    }
}

pub fn evaluate_condition(condition: &CaseCondition, state: &Value) -> bool {
    let actual = resolve_path(state, &condition.variable_selector);
    let expected = &condition.value;

    match actual {
        Some(Value::Number(n)) => {
            let Some(actual) = n.as_f64() else {
                return false;
            };
            let expected = match expected {
                Value::Number(e) => e.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            };
            match condition.comparison_operator {
                ComparisonOperator::Equal => expected.map(|e| actual == e).unwrap_or(false),
                ComparisonOperator::NotEqual => expected.map(|e| actual != e).unwrap_or(false),
                ComparisonOperator::Gt => expected.map(|e| actual > e).unwrap_or(false),
                ComparisonOperator::Lt => expected.map(|e| actual < e).unwrap_or(false),
                ComparisonOperator::Ge => expected.map(|e| actual >= e).unwrap_or(false),
                ComparisonOperator::Le => expected.map(|e| actual <= e).unwrap_or(false),
                ComparisonOperator::Empty => false,
                ComparisonOperator::NotEmpty => true,
                _ => false,
            }
        }
        Some(Value::String(s)) => {
            let expected = match expected {
                Value::String(e) => e.clone(),
                other => other.to_string(),
            };
            match condition.comparison_operator {
                ComparisonOperator::Equal => *s == expected,
                ComparisonOperator::NotEqual => *s != expected,
                ComparisonOperator::Contains => s.contains(&expected),
                ComparisonOperator::NotContains => !s.contains(&expected),
                ComparisonOperator::StartsWith => s.starts_with(&expected),
                ComparisonOperator::EndsWith => s.ends_with(&expected),
                ComparisonOperator::Empty => s.trim().is_empty(),
                ComparisonOperator::NotEmpty => !s.trim().is_empty(),
                ComparisonOperator::IsTrue => s.eq_ignore_ascii_case("true"),
                ComparisonOperator::IsFalse => s.eq_ignore_ascii_case("false"),
                _ => false,
            }
        }
        other => {
            let is_empty = match other {
                None | Some(Value::Null) => true,
                Some(Value::Array(items)) => items.is_empty(),
                Some(Value::Object(map)) => map.is_empty(),
                _ => false,
            };
            let truthy = matches!(other, Some(Value::Bool(true)));
            match condition.comparison_operator {
                ComparisonOperator::Empty => is_empty,
                ComparisonOperator::NotEmpty => !is_empty,
                ComparisonOperator::IsTrue => truthy,
                ComparisonOperator::IsFalse => matches!(other, Some(Value::Bool(false))),
                _ => false,
            }
        }
    }
}

/// Resolve a dotted path against a JSON state map.
pub fn resolve_path<'a>(state: &'a Value, selector: &str) -> Option<&'a Value> {
    let mut current = state;
    for segment in selector.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow must define at least one node")]
    NoNodes,
    #[error("Invalid node key: {0}")]
    InvalidNodeKey(String),
    #[error("Edge references unknown node '{0}'")]
    UnknownTarget(NodeKey),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(
        id: &str,
        op: LogicalOperator,
        conditions: Vec<CaseCondition>,
    ) -> BranchCase {
        BranchCase {
            case_id: id.to_string(),
            logical_operator: op,
            conditions,
            target: NodeKey::new("Answer_1").unwrap(),
        }
    }

    fn condition(selector: &str, op: ComparisonOperator, value: Value) -> CaseCondition {
        CaseCondition {
            variable_selector: selector.to_string(),
            comparison_operator: op,
            value,
        }
    }

    #[test]
    fn test_first_matching_case_wins() {
        let state = json!({"score": 7});
        let cases = vec![
            case(
                "low",
                LogicalOperator::And,
                vec![condition("score", ComparisonOperator::Lt, json!(5))],
            ),
            case(
                "mid",
                LogicalOperator::And,
                vec![condition("score", ComparisonOperator::Lt, json!(10))],
            ),
            case(
                "also-matches",
                LogicalOperator::And,
                vec![condition("score", ComparisonOperator::Gt, json!(0))],
            ),
        ];
        assert_eq!(
            evaluate_cases(&cases, &state),
            CaseSelection::Case("mid".to_string())
        );
    }

    #[test]
    fn test_vacuous_and_is_selected() {
        let cases = vec![case("vacuous", LogicalOperator::And, vec![])];
        assert_eq!(
            evaluate_cases(&cases, &json!({})),
            CaseSelection::Case("vacuous".to_string())
        );
    }

    #[test]
    fn test_vacuous_or_falls_through() {
        let cases = vec![case("never", LogicalOperator::Or, vec![])];
        assert_eq!(evaluate_cases(&cases, &json!({})), CaseSelection::Fallback);
    }

    #[test]
    fn test_and_or_over_mixed_conditions() {
        let state = json!({"kind": "report", "score": 3});
        let both = case(
            "both",
            LogicalOperator::And,
            vec![
                condition("kind", ComparisonOperator::Equal, json!("report")),
                condition("score", ComparisonOperator::Gt, json!(5)),
            ],
        );
        let either = case(
            "either",
            LogicalOperator::Or,
            vec![
                condition("kind", ComparisonOperator::Equal, json!("report")),
                condition("score", ComparisonOperator::Gt, json!(5)),
            ],
        );
        assert!(!evaluate_case(&both, &state));
        assert!(evaluate_case(&either, &state));
    }

    #[test]
    fn test_string_operators() {
        let state = json!({"message": "hello world"});
        assert!(evaluate_condition(
            &condition("message", ComparisonOperator::Contains, json!("world")),
            &state
        ));
        assert!(evaluate_condition(
            &condition("message", ComparisonOperator::StartsWith, json!("hello")),
            &state
        ));
        assert!(!evaluate_condition(
            &condition("message", ComparisonOperator::EndsWith, json!("hello")),
            &state
        ));
    }

    #[test]
    fn test_missing_selector_only_matches_empty() {
        let state = json!({"present": 1});
        assert!(evaluate_condition(
            &condition("absent", ComparisonOperator::Empty, Value::Null),
            &state
        ));
        assert!(!evaluate_condition(
            &condition("absent", ComparisonOperator::Equal, json!(1)),
            &state
        ));
    }

    #[test]
    fn test_dotted_path_resolution() {
        let state = json!({"agent": {"output": {"score": 0.9}}});
        assert_eq!(
            resolve_path(&state, "agent.output.score"),
            Some(&json!(0.9))
        );
        assert_eq!(resolve_path(&state, "agent.missing.score"), None);
    }

    #[test]
    fn test_workflow_validates_edges() {
        let answer = NodeKey::new("Answer_1").unwrap();
        let mut nodes = HashMap::new();
        nodes.insert(
            answer.clone(),
            WorkflowNode {
                key: answer.clone(),
                kind: NodeKind::Answer {
                    variable: "output".to_string(),
                },
            },
        );
        let agent = NodeKey::new("Agent_1").unwrap();
        nodes.insert(
            agent.clone(),
            WorkflowNode {
                key: agent.clone(),
                kind: NodeKind::Agent {
                    agent_key: "primary".to_string(),
                    next: Some(NodeKey::new("Missing").unwrap()),
                },
            },
        );

        let result = Workflow::new(
            WorkflowMetadata {
                name: "bad".to_string(),
                version: None,
                description: None,
            },
            agent,
            nodes,
        );
        assert!(matches!(result, Err(WorkflowError::UnknownTarget(_))));
    }
}
