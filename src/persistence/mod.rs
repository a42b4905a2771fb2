//! Persistence boundary for previous executions
//!
//! The transformers only read what a previous execution recorded. Every query
//! is keyed by the previous plan execution id, and node executions superseded
//! by an in-run retry (`old_retry`) never surface.

pub mod cursor;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod store;

pub use cursor::Cursor;
pub use memory::{InMemoryStore, StoreSnapshot};

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{
    ExecutionSummary, Node, NodeExecution, PlanExecutionMetadata, Projection, RetryStageInfo,
    StepCategory,
};
use anyhow::Result;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Queries over the node executions and plan nodes of previous runs
#[async_trait::async_trait]
pub trait NodeExecutionStore: Send + Sync {
    /// Node executions whose stage FQN is one of `stage_fqns`
    async fn stream_by_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
        projection: Projection,
    ) -> Result<Cursor<NodeExecution>>;

    /// Strategy node executions under the given stages
    async fn stream_strategy_executions(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
    ) -> Result<Cursor<NodeExecution>>;

    /// Everything that ran inside a stage, stage nodes themselves excluded.
    /// `None` means every stage.
    async fn stream_stage_descendants(
        &self,
        plan_execution_id: &str,
        stage_fqns: Option<&[String]>,
    ) -> Result<Cursor<NodeExecution>>;

    async fn fetch_node(&self, node_id: &str) -> Result<Option<Node>>;

    /// Resolve stage identifiers to the FQNs they ran under
    async fn fetch_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_identifiers: &[String],
    ) -> Result<Vec<String>>;

    /// Stage-level summaries in execution order
    async fn fetch_retry_stage_infos(&self, plan_execution_id: &str) -> Result<Vec<RetryStageInfo>>;

    /// Map node execution id to the plan node it ran, for the given stages.
    ///
    /// Several executions map to the same node when it was repeated by a
    /// strategy.
    async fn map_plan_nodes_for_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
    ) -> Result<IndexMap<String, Node>> {
        let executions: Vec<NodeExecution> = self
            .stream_by_stage_fqns(plan_execution_id, stage_fqns, Projection::Identity)
            .await?
            .collect();

        let mut definitions: HashMap<String, Option<Node>> = HashMap::new();
        let mut mapped = IndexMap::new();
        for execution in executions {
            if !definitions.contains_key(&execution.node_id) {
                let node = self.fetch_node(&execution.node_id).await?;
                definitions.insert(execution.node_id.clone(), node);
            }
            if let Some(Some(node)) = definitions.get(&execution.node_id) {
                mapped.insert(execution.uuid, node.clone());
            }
        }
        Ok(mapped)
    }
}

/// Execution-level records: summaries, metadata and pipeline definitions
#[async_trait::async_trait]
pub trait ExecutionRecordStore: Send + Sync {
    async fn execution_summary(&self, plan_execution_id: &str) -> Result<Option<ExecutionSummary>>;

    async fn plan_execution_metadata(
        &self,
        plan_execution_id: &str,
    ) -> Result<Option<PlanExecutionMetadata>>;

    async fn save_plan_execution_metadata(&self, metadata: &PlanExecutionMetadata) -> Result<()>;

    /// Insert or replace the summary keyed by its plan execution id
    async fn save_execution_summary(&self, summary: &ExecutionSummary) -> Result<()>;

    /// Current (template-resolved) YAML of a pipeline, `None` if deleted
    async fn pipeline_yaml(&self, pipeline_identifier: &str) -> Result<Option<String>>;

    /// Every execution of a retry lineage, newest first
    async fn summaries_by_root(&self, root_execution_id: &str) -> Result<Cursor<ExecutionSummary>>;
}

/// Filter and order shared by the backends
pub(crate) fn select_executions<'a>(
    executions: impl Iterator<Item = &'a NodeExecution>,
    plan_execution_id: &str,
    keep: impl Fn(&NodeExecution) -> bool,
) -> Vec<NodeExecution> {
    let mut selected: Vec<NodeExecution> = executions
        .filter(|execution| execution.plan_execution_id == plan_execution_id && !execution.old_retry)
        .filter(|execution| keep(execution))
        .cloned()
        .collect();
    selected.sort_by_key(|execution| execution.start_ts);
    selected
}

pub(crate) fn in_stages(execution: &NodeExecution, stage_fqns: &[String]) -> bool {
    stage_fqns.iter().any(|fqn| *fqn == execution.stage_fqn)
}

pub(crate) fn is_stage_descendant(execution: &NodeExecution, stage_fqns: Option<&[String]>) -> bool {
    if execution.stage_fqn.is_empty() || execution.category() == StepCategory::Stage {
        return false;
    }
    stage_fqns.map_or(true, |fqns| in_stages(execution, fqns))
}

/// Stage FQNs of the stage executions with the given identifiers, in
/// execution order and without repeats
pub(crate) fn stage_fqns_for(executions: &[NodeExecution], stage_identifiers: &[String]) -> Vec<String> {
    let mut fqns: Vec<String> = Vec::new();
    for execution in executions {
        if execution.category() == StepCategory::Stage
            && stage_identifiers.contains(&execution.identifier)
            && !fqns.contains(&execution.stage_fqn)
        {
            fqns.push(execution.stage_fqn.clone());
        }
    }
    fqns
}
