//! Rewrite a compiled plan for a retry
//!
//! Nodes of stages that are copied forward become identity nodes bound to
//! their previous executions; everything from the retry point on stays live.

use crate::core::{IdentityAccumulator, Node, Plan, StepCategory};
use crate::error::Result;
use crate::persistence::NodeExecutionStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RetryPlanTransformer {
    nodes: Arc<dyn NodeExecutionStore>,
}

impl RetryPlanTransformer {
    pub fn new(nodes: Arc<dyn NodeExecutionStore>) -> Self {
        Self { nodes }
    }

    /// Derive the retry plan from a freshly compiled one.
    ///
    /// `skipped_stage_identifiers` comes from the YAML rewrite;
    /// `retry_stage_identifiers` are the stages the caller asked to re-run.
    pub async fn transform(
        &self,
        plan: &Plan,
        skipped_stage_identifiers: &[String],
        retry_stage_identifiers: &[String],
        previous_execution_id: &str,
    ) -> Result<Plan> {
        let skipped_fqns = self
            .nodes
            .fetch_stage_fqns(previous_execution_id, skipped_stage_identifiers)
            .await?;
        let retry_fqns = self
            .nodes
            .fetch_stage_fqns(previous_execution_id, retry_stage_identifiers)
            .await?;

        let identities = self
            .identity_nodes(previous_execution_id, &skipped_fqns)
            .await?;
        let strategy_executions = self
            .stage_strategy_executions(previous_execution_id, &retry_fqns)
            .await?;

        let skipped: HashSet<&str> = skipped_fqns.iter().map(String::as_str).collect();
        let retried: HashSet<&str> = retry_fqns.iter().map(String::as_str).collect();
        let identity_uuids: HashSet<String> = identities.iter().map(|node| node.uuid.clone()).collect();

        let mut substituted = 0;
        let live = plan
            .nodes()
            .filter(|node| !skipped.contains(node.stage_fqn.as_str()))
            .filter(|node| !identity_uuids.contains(&node.uuid))
            .map(|node| {
                if node.category() != StepCategory::Strategy || !retried.contains(node.stage_fqn.as_str()) {
                    return node.clone();
                }
                match strategy_executions.get(&node.uuid) {
                    Some(execution_id) => {
                        substituted += 1;
                        node.to_identity(vec![execution_id.clone()], true)
                    }
                    None => node.clone(),
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Retry plan: {} identity node(s), {} live node(s), {} strategy node(s) reused",
            identities.len(),
            live.len() - substituted,
            substituted
        );

        let mut nodes = identities;
        nodes.extend(live);
        plan.with_nodes(nodes)
    }

    /// One identity node per previously executed plan node of the skipped
    /// stages. Stage nodes are left out.
    async fn identity_nodes(&self, previous_execution_id: &str, skipped_fqns: &[String]) -> Result<Vec<Node>> {
        if skipped_fqns.is_empty() {
            return Ok(Vec::new());
        }

        let mapped = self
            .nodes
            .map_plan_nodes_for_stage_fqns(previous_execution_id, skipped_fqns)
            .await?;

        let mut accumulator = IdentityAccumulator::new();
        let mut definitions: HashMap<String, Node> = HashMap::new();
        for (execution_id, node) in mapped {
            if node.category() == StepCategory::Stage {
                continue;
            }
            accumulator.record(&node.uuid, &execution_id);
            definitions.entry(node.uuid.clone()).or_insert(node);
        }

        Ok(accumulator
            .into_entries()
            .filter_map(|(node_id, execution_ids)| {
                definitions
                    .get(&node_id)
                    .map(|node| node.to_identity(execution_ids, false))
            })
            .collect())
    }

    /// Stage-level strategy executions of the retried stages, keyed by plan
    /// node id. The latest execution wins when a node ran more than once.
    async fn stage_strategy_executions(
        &self,
        previous_execution_id: &str,
        retry_fqns: &[String],
    ) -> Result<HashMap<String, String>> {
        if retry_fqns.is_empty() {
            return Ok(HashMap::new());
        }

        let mut by_node = HashMap::new();
        let cursor = self
            .nodes
            .stream_strategy_executions(previous_execution_id, retry_fqns)
            .await?;
        for execution in cursor {
            if !execution.ambiance.is_current_strategy_level_at_stage() {
                debug!("Strategy execution {} is not at stage level", execution.uuid);
                continue;
            }
            by_node.insert(execution.node_id, execution.uuid);
        }
        Ok(by_node)
    }
}
