//! Rollback preparation against a previous run

use crate::helpers::*;
use pretty_assertions::assert_eq;
use replan::core::{ExecutionMode, ExecutionStatus, Node, Plan, StepCategory};
use replan::error::Result;
use replan::execution::{ExecutionModeOrchestrator, ExecutionRequest};
use replan::persistence::InMemoryStore;
use replan::yaml::{self, reverse_and_filter_stages, PipelineVersion};
use std::sync::Arc;

/// Adds a fork and a strategy node to the first stage
fn compile_with_structure(processed_yaml: &str, version: PipelineVersion) -> Result<Plan> {
    let plan = compile_stages(processed_yaml, version)?;
    let mut nodes: Vec<Node> = plan.nodes().cloned().collect();
    nodes.push(node("s1-fork", "fork", StepCategory::Fork, &stage_fqn("s1")));
    nodes.push(node("s1-strategy", "matrix", StepCategory::Strategy, &stage_fqn("s1")));
    plan.with_nodes(nodes)
}

#[test]
fn test_reverse_twice_restores_order() {
    let pipelines = [
        v0_pipeline(&["s1"], "a"),
        v0_pipeline(&["s1", "s2"], "a"),
        v0_pipeline(&["build", "test", "stage", "prod"], "a"),
        "version: 1\nstages:\n  - id: a\n  - id: b\n  - id: c\n".to_string(),
    ];

    for pipeline in &pipelines {
        let once = reverse_and_filter_stages(pipeline).unwrap();
        let twice = reverse_and_filter_stages(&once).unwrap();

        let mut reversed = yaml::stage_identifiers(pipeline).unwrap();
        reversed.reverse();
        assert_eq!(yaml::stage_identifiers(&once).unwrap(), reversed);
        assert_eq!(
            yaml::stage_identifiers(&twice).unwrap(),
            yaml::stage_identifiers(pipeline).unwrap()
        );
    }
}

#[tokio::test]
async fn test_pipeline_rollback_of_three_stages() {
    let processed = v0_pipeline(&["s1", "s2", "s3"], "run");
    let mut snapshot = previous_run(
        &processed,
        &[("s1", ExecutionStatus::Succeeded), ("s2", ExecutionStatus::Failed)],
    );
    let fork = node("s1-fork", "fork", StepCategory::Fork, &stage_fqn("s1"));
    snapshot
        .node_executions
        .push(ran("ne-s1-fork", &fork, ExecutionStatus::Succeeded, 2));

    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let orchestrator = ExecutionModeOrchestrator::new(
        Arc::new(compile_with_structure),
        store.clone(),
        store.clone(),
    );

    let request = ExecutionRequest::rollback(ExecutionMode::PipelineRollback, processed, PREVIOUS, Vec::new());
    let prepared = orchestrator.prepare(&request).await.unwrap();

    assert_eq!(prepared.mode, ExecutionMode::PipelineRollback);
    assert_eq!(
        yaml::stage_identifiers(&prepared.processed_yaml).unwrap(),
        ids(&["s3", "s2", "s1"])
    );

    for step in ["s1-step", "s2-step"] {
        let node = prepared.plan.node(step).unwrap();
        assert!(node.is_identity(), "{} should be reused", step);
        assert_eq!(node.original_node_execution_ids(), ids(&[format!("ne-{}", step).as_str()]));
    }
    assert!(prepared.plan.node("s3-step").is_none(), "s3 never ran");

    for structural in ["pipeline", "stages", "s1", "s2", "s3", "s1-fork", "s1-strategy"] {
        let node = prepared.plan.node(structural).unwrap();
        assert!(!node.is_identity(), "{} should stay live", structural);
        assert!(node.preserve_in_rollback_mode, "{} should be preserved", structural);
    }
}

#[tokio::test]
async fn test_post_execution_rollback_of_one_stage() {
    let processed = v0_pipeline(&["s1", "s2"], "run");
    let (orchestrator, _) = orchestrator(previous_run(
        &processed,
        &[("s1", ExecutionStatus::Succeeded), ("s2", ExecutionStatus::Succeeded)],
    ));

    let selected = yaml::retain_stages(&processed, &ids(&["s2"])).unwrap();
    let request = ExecutionRequest::rollback(
        ExecutionMode::PostExecutionRollback,
        selected,
        PREVIOUS,
        vec![stage_fqn("s2")],
    );
    let prepared = orchestrator.prepare(&request).await.unwrap();

    assert_eq!(yaml::stage_identifiers(&prepared.processed_yaml).unwrap(), ids(&["s2"]));
    assert!(prepared.plan.node("s1-step").is_none());
    assert!(prepared.plan.node("s2-step").unwrap().is_identity());
    assert!(prepared.plan.node("s2").unwrap().preserve_in_rollback_mode);
}
