//! Test builders for replan scenarios
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use replan::core::{
    ExecutionStatus, ExecutionSummary, Node, NodeExecution, Plan, PlanExecutionMetadata, RetryStageInfo,
    StepCategory, StepType,
};
use replan::error::Result;
use replan::execution::{ExecutionModeOrchestrator, PlanCompiler};
use replan::persistence::{InMemoryStore, StoreSnapshot};
use replan::yaml::{self, PipelineVersion};
use std::sync::Arc;

/// Plan execution id of the run being retried or rolled back
pub const PREVIOUS: &str = "exec-1";

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn stage_fqn(stage: &str) -> String {
    format!("pipeline.stages.{}", stage)
}

pub fn node(uuid: &str, identifier: &str, category: StepCategory, fqn: &str) -> Node {
    Node::plan(uuid, identifier, StepType::new(format!("{:?}", category), category), fqn)
}

pub fn stage_node(stage: &str) -> Node {
    node(stage, stage, StepCategory::Stage, &stage_fqn(stage))
}

pub fn step_node(stage: &str) -> Node {
    node(&format!("{}-step", stage), "deploy", StepCategory::Step, &stage_fqn(stage))
}

/// Plan of a compiled pipeline: pipeline and stages nodes, then a stage node
/// and one step per stage
pub fn compile_stages(processed_yaml: &str, _version: PipelineVersion) -> Result<Plan> {
    let mut nodes = vec![
        node("pipeline", "pipeline", StepCategory::Pipeline, ""),
        node("stages", "stages", StepCategory::Stages, ""),
    ];
    for stage in yaml::stage_identifiers(processed_yaml)? {
        nodes.push(stage_node(&stage));
        nodes.push(step_node(&stage));
    }
    Plan::new("plan", "pipeline", nodes)
}

pub fn compiler() -> Arc<dyn PlanCompiler> {
    Arc::new(compile_stages)
}

pub fn at_minute(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
}

/// A previous execution of `node`
pub fn ran(execution_id: &str, node: &Node, status: ExecutionStatus, minute: i64) -> NodeExecution {
    NodeExecution {
        uuid: execution_id.to_string(),
        plan_execution_id: PREVIOUS.to_string(),
        node_id: node.uuid.clone(),
        identifier: node.identifier.clone(),
        step_type: node.step_type.clone(),
        stage_fqn: node.stage_fqn.clone(),
        status,
        ambiance: Default::default(),
        old_retry: false,
        start_ts: Some(at_minute(minute)),
        parent_id: None,
    }
}

/// Snapshot of a previous run where each `(stage, status)` executed its
/// stage node and step, in order. Stages that started are chained one after
/// the other in the stage summaries, so each forms its own retry group.
pub fn previous_run(processed_yaml: &str, stages: &[(&str, ExecutionStatus)]) -> StoreSnapshot {
    let mut snapshot = StoreSnapshot::default();
    let started: Vec<&str> = stages
        .iter()
        .filter(|(_, status)| *status != ExecutionStatus::NotStarted)
        .map(|(stage, _)| *stage)
        .collect();
    let infos = stages
        .iter()
        .filter(|(_, status)| *status != ExecutionStatus::NotStarted)
        .enumerate()
        .map(|(index, (stage, status))| match started.get(index + 1) {
            Some(next) => RetryStageInfo::new(*stage, *status).followed_by(*next),
            None => RetryStageInfo::new(*stage, *status),
        })
        .collect();
    snapshot.retry_stage_infos.insert(PREVIOUS.to_string(), infos);

    for (index, (stage, status)) in stages.iter().enumerate() {
        let minute = index as i64 * 10;
        let stage = stage_node(stage);
        let step = step_node(&stage.identifier);
        snapshot
            .node_executions
            .push(ran(&format!("ne-{}", stage.uuid), &stage, *status, minute));
        snapshot
            .node_executions
            .push(ran(&format!("ne-{}", step.uuid), &step, *status, minute + 1));
        snapshot.plan_nodes.push(stage);
        snapshot.plan_nodes.push(step);
    }
    snapshot.plan_execution_metadata.push(PlanExecutionMetadata {
        plan_execution_id: PREVIOUS.to_string(),
        yaml: processed_yaml.to_string(),
        processed_yaml: processed_yaml.to_string(),
        ..Default::default()
    });
    snapshot
}

pub fn summary(plan_execution_id: &str, root: Option<&str>, created_at: DateTime<Utc>) -> ExecutionSummary {
    ExecutionSummary {
        plan_execution_id: plan_execution_id.to_string(),
        pipeline_identifier: "deploy".to_string(),
        root_execution_id: root.map(str::to_string),
        is_latest_execution: true,
        created_at,
        start_ts: Some(created_at),
        end_ts: None,
        status: ExecutionStatus::Failed,
        rollback_mode_execution_id: None,
    }
}

/// V0 pipeline with one `__uuid`-tagged stage per identifier
pub fn v0_pipeline(stages: &[&str], uuid_prefix: &str) -> String {
    let mut yaml = String::from("pipeline:\n  identifier: deploy\n  stages:\n");
    for stage in stages {
        yaml.push_str(&format!(
            "    - __uuid: {prefix}-{stage}\n      stage:\n        __uuid: {prefix}-{stage}-body\n        identifier: {stage}\n        name: {stage}\n        spec:\n          image: {prefix}\n",
            prefix = uuid_prefix,
            stage = stage
        ));
    }
    yaml
}

pub fn orchestrator(snapshot: StoreSnapshot) -> (ExecutionModeOrchestrator, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let orchestrator = ExecutionModeOrchestrator::new(compiler(), store.clone(), store.clone());
    (orchestrator, store)
}
