//! Rewrite a compiled plan for rollback modes
//!
//! Work units that ran previously become identity nodes, carrying the
//! rollback routing of the compiled plan; the orchestration skeleton stays
//! live so the rollback run can walk it.

use crate::core::{ExecutionMode, IdentityAccumulator, Node, Plan};
use crate::error::Result;
use crate::persistence::NodeExecutionStore;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a rollback attempt covers
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackRequest {
    pub previous_execution_id: String,
    pub mode: ExecutionMode,
    /// Stages selected for post-execution rollback
    pub selected_stage_fqns: Vec<String>,
    /// Nodes kept live regardless of category
    pub preserve_node_ids: Vec<String>,
}

impl RollbackRequest {
    /// Stages whose previous executions are reused; `None` for all of them
    pub fn descendant_scope(&self) -> Option<&[String]> {
        match self.mode {
            ExecutionMode::PostExecutionRollback => Some(self.selected_stage_fqns.as_slice()),
            _ => None,
        }
    }

    fn attaches_advisers_to(&self, node: &Node) -> bool {
        match self.mode {
            ExecutionMode::PipelineRollback => true,
            ExecutionMode::PostExecutionRollback => self.selected_stage_fqns.contains(&node.stage_fqn),
            ExecutionMode::Normal | ExecutionMode::Undefined => false,
        }
    }
}

pub struct RollbackPlanTransformer {
    nodes: Arc<dyn NodeExecutionStore>,
}

impl RollbackPlanTransformer {
    pub fn new(nodes: Arc<dyn NodeExecutionStore>) -> Self {
        Self { nodes }
    }

    pub async fn transform(&self, plan: &Plan, request: &RollbackRequest) -> Result<Plan> {
        let mut identities = self.identity_nodes(plan, request).await?;

        for node in plan.nodes() {
            if !request.attaches_advisers_to(node) {
                continue;
            }
            let Some(advisers) = node.advisers_for(request.mode) else {
                continue;
            };
            match identities.get_mut(&node.uuid) {
                Some(identity) => *identity = identity.with_adviser_override(advisers.to_vec()),
                None => debug!("Node {} never started previously, no routing to attach", node.uuid),
            }
        }

        let preserve: HashSet<&str> = request.preserve_node_ids.iter().map(String::as_str).collect();
        let mut nodes = Vec::with_capacity(plan.len());
        let mut preserved = 0;
        let mut dropped = 0;
        for node in plan.nodes() {
            if preserve.contains(node.uuid.as_str()) || node.category().is_structural() {
                identities.shift_remove(&node.uuid);
                nodes.push(node.preserved_for_rollback());
                preserved += 1;
            } else if let Some(identity) = identities.shift_remove(&node.uuid) {
                nodes.push(identity);
            } else {
                dropped += 1;
            }
        }
        nodes.extend(identities.into_values());

        info!(
            "{} plan: {} identity node(s), {} preserved node(s), {} dropped",
            request.mode,
            nodes.len() - preserved,
            preserved,
            dropped
        );
        plan.with_nodes(nodes)
    }

    /// One identity node per plan node that ran inside a stage previously,
    /// keyed by plan node id
    async fn identity_nodes(&self, plan: &Plan, request: &RollbackRequest) -> Result<IndexMap<String, Node>> {
        let mut accumulator = IdentityAccumulator::new();
        let cursor = self
            .nodes
            .stream_stage_descendants(&request.previous_execution_id, request.descendant_scope())
            .await?;
        for execution in cursor {
            accumulator.record(&execution.node_id, &execution.uuid);
        }

        let mut identities = IndexMap::new();
        for (node_id, execution_ids) in accumulator.into_entries() {
            let definition = match plan.node(&node_id) {
                Some(node) => node.clone(),
                None => match self.nodes.fetch_node(&node_id).await? {
                    Some(node) if !node.category().is_structural() => node,
                    Some(_) => continue,
                    None => {
                        warn!("No definition found for previously executed node {}", node_id);
                        continue;
                    }
                },
            };
            identities.insert(node_id, definition.to_identity(execution_ids, false));
        }
        Ok(identities)
    }
}
