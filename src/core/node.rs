//! Plan node domain model
//!
//! A node is either a live `Plan` node that carries the step configuration
//! to execute, or an `Identity` node that stands in for node executions of a
//! previous run and is never executed itself.

use crate::core::state::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of a step, from the pipeline root down to leaf steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCategory {
    Pipeline,
    Stages,
    Stage,
    Fork,
    Strategy,
    Step,
}

impl StepCategory {
    /// Orchestration skeleton categories (everything except plain steps)
    pub fn is_structural(&self) -> bool {
        !matches!(self, StepCategory::Step)
    }
}

/// Step type: the concrete step kind plus its category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepType {
    #[serde(rename = "type")]
    pub kind: String,
    pub category: StepCategory,
}

impl StepType {
    pub fn new(kind: impl Into<String>, category: StepCategory) -> Self {
        Self {
            kind: kind.into(),
            category,
        }
    }
}

/// Post-completion routing directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl AdviserObtainment {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: None,
        }
    }
}

/// A node in a compiled plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within its plan
    pub uuid: String,

    pub identifier: String,

    #[serde(default)]
    pub name: String,

    pub step_type: StepType,

    /// Fully-qualified stage path; empty above stage level
    #[serde(default)]
    pub stage_fqn: String,

    /// Routing directives per execution mode
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub advisers: BTreeMap<ExecutionMode, Vec<AdviserObtainment>>,

    #[serde(default)]
    pub preserve_in_rollback_mode: bool,

    #[serde(flatten)]
    pub kind: NodeKind,
}

/// What a node does when the runtime reaches it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    /// Executes its step configuration
    Plan {
        #[serde(default)]
        step_parameters: serde_json::Value,
    },

    /// Copies forward the results of previous node executions
    Identity {
        original_node_execution_ids: Vec<String>,

        /// Route with the node's own advisers instead of the recorded outcome
        #[serde(default)]
        use_adviser_obtainments: bool,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        adviser_override: Option<Vec<AdviserObtainment>>,
    },
}

impl Node {
    /// Create a live plan node
    pub fn plan(
        uuid: impl Into<String>,
        identifier: impl Into<String>,
        step_type: StepType,
        stage_fqn: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: uuid.into(),
            name: identifier.clone(),
            identifier,
            step_type,
            stage_fqn: stage_fqn.into(),
            advisers: BTreeMap::new(),
            preserve_in_rollback_mode: false,
            kind: NodeKind::Plan {
                step_parameters: serde_json::Value::Null,
            },
        }
    }

    /// Set the routing directives for one execution mode
    pub fn with_advisers(mut self, mode: ExecutionMode, advisers: Vec<AdviserObtainment>) -> Self {
        self.advisers.insert(mode, advisers);
        self
    }

    pub fn category(&self) -> StepCategory {
        self.step_type.category
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, NodeKind::Identity { .. })
    }

    /// Routing directives registered for the given mode, if any
    pub fn advisers_for(&self, mode: ExecutionMode) -> Option<&[AdviserObtainment]> {
        self.advisers
            .get(&mode)
            .filter(|advisers| !advisers.is_empty())
            .map(Vec::as_slice)
    }

    /// Execution ids an identity node stands in for (empty for plan nodes)
    pub fn original_node_execution_ids(&self) -> &[String] {
        match &self.kind {
            NodeKind::Identity {
                original_node_execution_ids,
                ..
            } => original_node_execution_ids,
            NodeKind::Plan { .. } => &[],
        }
    }

    /// Derive an identity node that reuses the given previous executions.
    ///
    /// The envelope (uuid, identifier, stage path, advisers) is kept so the
    /// identity node slots into the same position of the graph.
    pub fn to_identity(&self, original_node_execution_ids: Vec<String>, use_adviser_obtainments: bool) -> Node {
        Node {
            uuid: self.uuid.clone(),
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            step_type: self.step_type.clone(),
            stage_fqn: self.stage_fqn.clone(),
            advisers: self.advisers.clone(),
            preserve_in_rollback_mode: false,
            kind: NodeKind::Identity {
                original_node_execution_ids,
                use_adviser_obtainments,
                adviser_override: None,
            },
        }
    }

    /// Copy of an identity node routed with the given advisers. Plan nodes are
    /// returned unchanged.
    pub fn with_adviser_override(&self, advisers: Vec<AdviserObtainment>) -> Node {
        let mut node = self.clone();
        if let NodeKind::Identity { adviser_override, .. } = &mut node.kind {
            *adviser_override = Some(advisers);
        }
        node
    }

    /// Copy of a node kept live in rollback mode
    pub fn preserved_for_rollback(&self) -> Node {
        Node {
            preserve_in_rollback_mode: true,
            ..self.clone()
        }
    }
}

/// Collects previous executions per plan node id so a node that ran several
/// times (strategy repetitions) becomes exactly one identity node.
#[derive(Debug, Default)]
pub struct IdentityAccumulator {
    entries: indexmap::IndexMap<String, Vec<String>>,
}

impl IdentityAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node_execution_id` ran plan node `node_id`
    pub fn record(&mut self, node_id: &str, node_execution_id: &str) {
        let ids = self.entries.entry(node_id.to_string()).or_default();
        if !ids.iter().any(|id| id == node_execution_id) {
            ids.push(node_execution_id.to_string());
        }
    }

    /// Plan node ids in first-seen order with their execution ids
    pub fn into_entries(self) -> impl Iterator<Item = (String, Vec<String>)> {
        self.entries.into_iter()
    }
}
