//! Workflow YAML Parser
//!
//! This module provides infrastructure for parsing workflow YAML manifests
//! into domain objects.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: 100monkeys.ai/v1
//! kind: Workflow
//! metadata:
//!   name: support-routing
//!   version: "1.0.0"
//! spec:
//!   start: Agent_triage
//!   nodes:
//!     Agent_triage:
//!       kind: agent
//!       agent_key: triage
//!       next: Router_severity
//!     Router_severity:
//!       kind: branch
//!       cases:
//!         - case_id: escalate
//!           logical_operator: AND
//!           conditions:
//!             - variable_selector: Agent_triage.output
//!               comparison_operator: contains
//!               value: urgent
//!           target: Answer_done
//!       fallback: Answer_done
//!     Answer_done:
//!       kind: answer
//!       variable: Agent_triage.output
//! ```

use crate::domain::workflow::*;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

/// External YAML representation of a workflow manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: WorkflowMetadataYaml,
    pub spec: WorkflowSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadataYaml {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpecYaml {
    pub start: String,
    pub nodes: HashMap<String, WorkflowNodeYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowNodeYaml {
    Agent {
        agent_key: String,
        #[serde(default)]
        next: Option<String>,
    },
    Tool {
        tool_name: String,
        #[serde(default)]
        args: HashMap<String, Value>,
        #[serde(default)]
        next: Option<String>,
    },
    Branch {
        cases: Vec<BranchCaseYaml>,
        #[serde(default)]
        fallback: Option<String>,
    },
    Answer {
        variable: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCaseYaml {
    pub case_id: String,
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<CaseCondition>,
    pub target: String,
}

// ============================================================================
// Parser
// ============================================================================

pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow manifest from a YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Workflow> {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        Self::parse_yaml(&contents)
    }

    /// Parse a workflow manifest from a YAML string
    pub fn parse_yaml(yaml: &str) -> Result<Workflow> {
        let manifest: WorkflowManifest =
            serde_yaml::from_str(yaml).context("Failed to parse workflow YAML")?;
        Self::to_domain(manifest)
    }

    fn to_domain(manifest: WorkflowManifest) -> Result<Workflow> {
        if manifest.kind != "Workflow" {
            bail!("Unexpected manifest kind '{}'", manifest.kind);
        }

        let metadata = WorkflowMetadata {
            name: manifest.metadata.name,
            version: manifest.metadata.version,
            description: manifest.metadata.description,
        };

        let start = NodeKey::new(manifest.spec.start)?;
        let mut nodes = HashMap::new();
        for (key, node) in manifest.spec.nodes {
            let key = NodeKey::new(key)?;
            let kind = Self::node_kind(node)?;
            nodes.insert(
                key.clone(),
                WorkflowNode { key, kind },
            );
        }

        Ok(Workflow::new(metadata, start, nodes)?)
    }

    fn node_kind(node: WorkflowNodeYaml) -> Result<NodeKind> {
        Ok(match node {
            WorkflowNodeYaml::Agent { agent_key, next } => NodeKind::Agent {
                agent_key,
                next: next.map(NodeKey::new).transpose()?,
            },
            WorkflowNodeYaml::Tool {
                tool_name,
                args,
                next,
            } => NodeKind::Tool {
                tool_name,
                args,
                next: next.map(NodeKey::new).transpose()?,
            },
            WorkflowNodeYaml::Branch { cases, fallback } => NodeKind::Branch {
                cases: cases
                    .into_iter()
                    .map(|case| {
                        Ok(BranchCase {
                            case_id: case.case_id,
                            logical_operator: case.logical_operator,
                            conditions: case.conditions,
                            target: NodeKey::new(case.target)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                fallback: fallback.map(NodeKey::new).transpose()?,
            },
            WorkflowNodeYaml::Answer { variable } => NodeKind::Answer { variable },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"
apiVersion: 100monkeys.ai/v1
kind: Workflow
metadata:
  name: support-routing
  version: "1.0.0"
spec:
  start: Agent_triage
  nodes:
    Agent_triage:
      kind: agent
      agent_key: triage
      next: Router_severity
    Router_severity:
      kind: branch
      cases:
        - case_id: urgent
          logical_operator: AND
          conditions:
            - variable_selector: Agent_triage.output
              comparison_operator: contains
              value: urgent
          target: Answer_done
      fallback: Answer_done
    Answer_done:
      kind: answer
      variable: Agent_triage.output
"#;

    #[test]
    fn test_parse_valid_manifest() {
        let workflow = WorkflowParser::parse_yaml(MANIFEST).unwrap();
        assert_eq!(workflow.metadata.name, "support-routing");
        assert_eq!(workflow.start.as_str(), "Agent_triage");
        assert_eq!(workflow.nodes.len(), 3);

        let router = workflow
            .get_node(&NodeKey::new("Router_severity").unwrap())
            .unwrap();
        match &router.kind {
            NodeKind::Branch { cases, fallback } => {
                assert_eq!(cases.len(), 1);
                assert_eq!(cases[0].case_id, "urgent");
                assert_eq!(
                    fallback.as_ref().map(|k| k.as_str()),
                    Some("Answer_done")
                );
            }
            other => panic!("Expected branch node, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_wrong_kind() {
        let yaml = MANIFEST.replace("kind: Workflow", "kind: AgentManifest");
        assert!(WorkflowParser::parse_yaml(&yaml).is_err());
    }

    #[test]
    fn test_rejects_dangling_edge() {
        let yaml = MANIFEST.replace("next: Router_severity", "next: Missing_node");
        let error = WorkflowParser::parse_yaml(&yaml).unwrap_err();
        assert!(error.to_string().contains("Missing_node"));
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        let workflow = WorkflowParser::parse_file(file.path()).unwrap();
        assert_eq!(workflow.metadata.name, "support-routing");
    }
}
