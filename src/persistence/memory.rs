//! In-memory store (for tests or snapshot-driven use)

use super::{
    in_stages, is_stage_descendant, select_executions, stage_fqns_for, Cursor, ExecutionRecordStore,
    NodeExecutionStore,
};
use crate::core::{
    ExecutionSummary, Node, NodeExecution, PlanExecutionMetadata, Projection, RetryStageInfo,
    StepCategory,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serializable dump of everything a store holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub node_executions: Vec<NodeExecution>,

    #[serde(default)]
    pub plan_nodes: Vec<Node>,

    /// Stage summaries keyed by plan execution id
    #[serde(default)]
    pub retry_stage_infos: HashMap<String, Vec<RetryStageInfo>>,

    #[serde(default)]
    pub execution_summaries: Vec<ExecutionSummary>,

    #[serde(default)]
    pub plan_execution_metadata: Vec<PlanExecutionMetadata>,

    /// Current pipeline YAML keyed by pipeline identifier
    #[serde(default)]
    pub pipelines: HashMap<String, String>,
}

impl StoreSnapshot {
    /// Load a snapshot from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse store snapshot")
    }
}

pub struct InMemoryStore {
    node_executions: RwLock<Vec<NodeExecution>>,
    plan_nodes: RwLock<HashMap<String, Node>>,
    retry_stage_infos: RwLock<HashMap<String, Vec<RetryStageInfo>>>,
    summaries: RwLock<HashMap<String, ExecutionSummary>>,
    metadata: RwLock<HashMap<String, PlanExecutionMetadata>>,
    pipelines: RwLock<HashMap<String, String>>,
    open_cursors: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_snapshot(StoreSnapshot::default())
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            node_executions: RwLock::new(snapshot.node_executions),
            plan_nodes: RwLock::new(
                snapshot
                    .plan_nodes
                    .into_iter()
                    .map(|node| (node.uuid.clone(), node))
                    .collect(),
            ),
            retry_stage_infos: RwLock::new(snapshot.retry_stage_infos),
            summaries: RwLock::new(
                snapshot
                    .execution_summaries
                    .into_iter()
                    .map(|summary| (summary.plan_execution_id.clone(), summary))
                    .collect(),
            ),
            metadata: RwLock::new(
                snapshot
                    .plan_execution_metadata
                    .into_iter()
                    .map(|metadata| (metadata.plan_execution_id.clone(), metadata))
                    .collect(),
            ),
            pipelines: RwLock::new(snapshot.pipelines),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Cursors handed out and not yet released
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    fn cursor<T>(&self, items: Vec<T>) -> Cursor<T> {
        let open = Arc::clone(&self.open_cursors);
        open.fetch_add(1, Ordering::SeqCst);
        Cursor::with_release(items, move || {
            open.fetch_sub(1, Ordering::SeqCst);
        })
    }

    async fn select(
        &self,
        plan_execution_id: &str,
        keep: impl Fn(&NodeExecution) -> bool,
    ) -> Vec<NodeExecution> {
        let executions = self.node_executions.read().await;
        select_executions(executions.iter(), plan_execution_id, keep)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NodeExecutionStore for InMemoryStore {
    async fn stream_by_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
        projection: Projection,
    ) -> Result<Cursor<NodeExecution>> {
        let selected = self
            .select(plan_execution_id, |execution| in_stages(execution, stage_fqns))
            .await;
        Ok(self.cursor(selected.iter().map(|execution| projection.apply(execution)).collect()))
    }

    async fn stream_strategy_executions(
        &self,
        plan_execution_id: &str,
        stage_fqns: &[String],
    ) -> Result<Cursor<NodeExecution>> {
        let selected = self
            .select(plan_execution_id, |execution| {
                execution.category() == StepCategory::Strategy && in_stages(execution, stage_fqns)
            })
            .await;
        Ok(self.cursor(selected))
    }

    async fn stream_stage_descendants(
        &self,
        plan_execution_id: &str,
        stage_fqns: Option<&[String]>,
    ) -> Result<Cursor<NodeExecution>> {
        let selected = self
            .select(plan_execution_id, |execution| is_stage_descendant(execution, stage_fqns))
            .await;
        Ok(self.cursor(selected))
    }

    async fn fetch_node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self.plan_nodes.read().await.get(node_id).cloned())
    }

    async fn fetch_stage_fqns(
        &self,
        plan_execution_id: &str,
        stage_identifiers: &[String],
    ) -> Result<Vec<String>> {
        let stages = self
            .select(plan_execution_id, |execution| execution.category() == StepCategory::Stage)
            .await;
        Ok(stage_fqns_for(&stages, stage_identifiers))
    }

    async fn fetch_retry_stage_infos(&self, plan_execution_id: &str) -> Result<Vec<RetryStageInfo>> {
        Ok(self
            .retry_stage_infos
            .read()
            .await
            .get(plan_execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ExecutionRecordStore for InMemoryStore {
    async fn execution_summary(&self, plan_execution_id: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.summaries.read().await.get(plan_execution_id).cloned())
    }

    async fn plan_execution_metadata(
        &self,
        plan_execution_id: &str,
    ) -> Result<Option<PlanExecutionMetadata>> {
        Ok(self.metadata.read().await.get(plan_execution_id).cloned())
    }

    async fn save_plan_execution_metadata(&self, metadata: &PlanExecutionMetadata) -> Result<()> {
        self.metadata
            .write()
            .await
            .insert(metadata.plan_execution_id.clone(), metadata.clone());
        Ok(())
    }

    async fn save_execution_summary(&self, summary: &ExecutionSummary) -> Result<()> {
        self.summaries
            .write()
            .await
            .insert(summary.plan_execution_id.clone(), summary.clone());
        Ok(())
    }

    async fn pipeline_yaml(&self, pipeline_identifier: &str) -> Result<Option<String>> {
        Ok(self.pipelines.read().await.get(pipeline_identifier).cloned())
    }

    async fn summaries_by_root(&self, root_execution_id: &str) -> Result<Cursor<ExecutionSummary>> {
        let summaries = self.summaries.read().await;
        let mut lineage: Vec<ExecutionSummary> = summaries
            .values()
            .filter(|summary| summary.lineage_id() == root_execution_id)
            .cloned()
            .collect();
        lineage.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
        Ok(self.cursor(lineage))
    }
}
