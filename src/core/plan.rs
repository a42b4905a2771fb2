//! Compiled execution plan

use crate::core::node::Node;
use crate::error::ReplanError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compiled DAG of nodes for one execution attempt.
///
/// Nodes are keyed by uuid and kept in insertion order. A plan is built once
/// and never mutated afterwards; transformers derive new plans with
/// [`Plan::with_nodes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanRecord", into = "PlanRecord")]
pub struct Plan {
    pub uuid: String,
    nodes: IndexMap<String, Node>,
    pub starting_node_id: String,
    pub setup_abstractions: BTreeMap<String, String>,
    pub graph_layout_info: Option<serde_json::Value>,
    pub valid: bool,
    pub error_response: Option<serde_json::Value>,
}

/// Serialized form of a plan: nodes as an ordered list
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanRecord {
    uuid: String,
    #[serde(default)]
    nodes: Vec<Node>,
    starting_node_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    setup_abstractions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    graph_layout_info: Option<serde_json::Value>,
    #[serde(default = "default_valid")]
    valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_response: Option<serde_json::Value>,
}

fn default_valid() -> bool {
    true
}

impl TryFrom<PlanRecord> for Plan {
    type Error = ReplanError;

    fn try_from(record: PlanRecord) -> Result<Self, Self::Error> {
        let plan = Plan {
            uuid: record.uuid,
            nodes: IndexMap::new(),
            starting_node_id: record.starting_node_id,
            setup_abstractions: record.setup_abstractions,
            graph_layout_info: record.graph_layout_info,
            valid: record.valid,
            error_response: record.error_response,
        };
        plan.with_nodes(record.nodes)
    }
}

impl From<Plan> for PlanRecord {
    fn from(plan: Plan) -> Self {
        PlanRecord {
            uuid: plan.uuid,
            nodes: plan.nodes.into_values().collect(),
            starting_node_id: plan.starting_node_id,
            setup_abstractions: plan.setup_abstractions,
            graph_layout_info: plan.graph_layout_info,
            valid: plan.valid,
            error_response: plan.error_response,
        }
    }
}

impl Plan {
    /// Build a plan from its nodes, rejecting duplicate uuids
    pub fn new(
        uuid: impl Into<String>,
        starting_node_id: impl Into<String>,
        nodes: Vec<Node>,
    ) -> Result<Self, ReplanError> {
        let empty = Plan {
            uuid: uuid.into(),
            nodes: IndexMap::new(),
            starting_node_id: starting_node_id.into(),
            setup_abstractions: BTreeMap::new(),
            graph_layout_info: None,
            valid: true,
            error_response: None,
        };
        empty.with_nodes(nodes)
    }

    /// Derive a plan with a replaced node set. Every other field passes
    /// through unchanged.
    pub fn with_nodes(&self, nodes: Vec<Node>) -> Result<Plan, ReplanError> {
        let mut keyed = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            if keyed.contains_key(&node.uuid) {
                return Err(ReplanError::internal(format!(
                    "Duplicate node uuid in plan {}: {}",
                    self.uuid, node.uuid
                )));
            }
            keyed.insert(node.uuid.clone(), node);
        }

        Ok(Plan {
            uuid: self.uuid.clone(),
            nodes: keyed,
            starting_node_id: self.starting_node_id.clone(),
            setup_abstractions: self.setup_abstractions.clone(),
            graph_layout_info: self.graph_layout_info.clone(),
            valid: self.valid,
            error_response: self.error_response.clone(),
        })
    }

    pub fn node(&self, uuid: &str) -> Option<&Node> {
        self.nodes.get(uuid)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that will actually execute
    pub fn live_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|node| !node.is_identity())
    }

    pub fn identity_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|node| node.is_identity())
    }
}
