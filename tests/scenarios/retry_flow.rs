//! Retry preparation against a previous run

use crate::helpers::*;
use pretty_assertions::assert_eq;
use replan::core::{ExecutionStatus, Node, RetryStageInfo, StepCategory};
use replan::error::ReplanError;
use replan::execution::{ExecutionRequest, RetryEligibilityValidator, RetryPlanTransformer, RetryRequest};
use replan::persistence::{ExecutionRecordStore, InMemoryStore, StoreSnapshot};
use replan::yaml::{self, PipelineVersion};
use std::collections::HashSet;
use std::sync::Arc;

fn retry(current: &str, stages: &[&str], failed_only: bool) -> ExecutionRequest {
    ExecutionRequest::retry(
        current,
        PREVIOUS,
        RetryRequest {
            stage_identifiers: ids(stages),
            failed_only,
        },
    )
}

#[tokio::test]
async fn test_retry_every_stage_is_a_no_op() {
    let previous = v0_pipeline(&["s1", "s2", "s3"], "old");
    let current = v0_pipeline(&["s1", "s2", "s3"], "new");
    let store = Arc::new(InMemoryStore::from_snapshot(previous_run(
        &previous,
        &[
            ("s1", ExecutionStatus::Succeeded),
            ("s2", ExecutionStatus::Failed),
            ("s3", ExecutionStatus::NotStarted),
        ],
    )));

    let every_stage = ids(&["s1", "s2", "s3"]);
    let rewritten = yaml::retry_processed_yaml(&previous, &current, &every_stage, PipelineVersion::V0);
    assert!(rewritten.skipped_stage_identifiers.is_empty());
    assert_eq!(yaml::stage_identifiers(&rewritten.yaml).unwrap(), every_stage);

    let compiled = compile_stages(&rewritten.yaml, PipelineVersion::V0).unwrap();
    let plan = RetryPlanTransformer::new(store)
        .transform(&compiled, &rewritten.skipped_stage_identifiers, &every_stage, PREVIOUS)
        .await
        .unwrap();

    assert_eq!(plan.identity_nodes().count(), 0);
    assert_eq!(
        plan.live_nodes().collect::<Vec<&Node>>(),
        compiled.nodes().collect::<Vec<&Node>>()
    );
}

#[tokio::test]
async fn test_retry_first_stage_reuses_nothing() {
    let previous = v0_pipeline(&["s1", "s2", "s3"], "old");
    let current = v0_pipeline(&["s1", "s2", "s3"], "new");
    let (orchestrator, _) = orchestrator(previous_run(
        &previous,
        &[
            ("s1", ExecutionStatus::Failed),
            ("s2", ExecutionStatus::NotStarted),
            ("s3", ExecutionStatus::NotStarted),
        ],
    ));

    let prepared = orchestrator
        .prepare(&retry(&current, &["s1"], false))
        .await
        .unwrap();

    assert_eq!(prepared.plan.identity_nodes().count(), 0);
    let metadata = prepared.retry_stages_metadata.unwrap();
    assert!(metadata.skip_stages_identifier.is_empty());
    assert_eq!(metadata.retry_stages_identifier, ids(&["s1"]));
}

#[tokio::test]
async fn test_retry_of_stage_that_never_ran_is_rejected() {
    let previous = v0_pipeline(&["s1", "s2"], "old");
    let (orchestrator, _) = orchestrator(previous_run(
        &previous,
        &[("s1", ExecutionStatus::Succeeded), ("s2", ExecutionStatus::Failed)],
    ));

    for stages in [&["nope"][..], &["s2", "nope"][..]] {
        let result = orchestrator.prepare(&retry(&previous, stages, false)).await;
        assert!(
            matches!(result, Err(ReplanError::InvalidRequest(_))),
            "retry of {:?} should be rejected",
            stages
        );
    }
}

#[tokio::test]
async fn test_retry_across_groups_is_rejected() {
    let previous = v0_pipeline(&["s1", "s2", "s3"], "old");
    let (serial, _) = orchestrator(previous_run(
        &previous,
        &[
            ("s1", ExecutionStatus::Succeeded),
            ("s2", ExecutionStatus::Failed),
            ("s3", ExecutionStatus::Failed),
        ],
    ));
    let result = serial.prepare(&retry(&previous, &["s2", "s3"], false)).await;
    assert!(matches!(result, Err(ReplanError::InvalidRequest(_))));

    let (parallel, _) = orchestrator(parallel_run());
    let result = parallel
        .prepare(&retry(PARALLEL_CURRENT, &["s1", "p1"], false))
        .await;
    assert!(matches!(result, Err(ReplanError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_retry_last_stage_reuses_everything_before_it() {
    let previous = v0_pipeline(&["s1", "s2", "s3"], "old");
    let current = v0_pipeline(&["s1", "s2", "s3"], "new");
    let (orchestrator, _) = orchestrator(previous_run(
        &previous,
        &[
            ("s1", ExecutionStatus::Succeeded),
            ("s2", ExecutionStatus::Succeeded),
            ("s3", ExecutionStatus::Failed),
        ],
    ));

    let prepared = orchestrator
        .prepare(&retry(&current, &["s3"], false))
        .await
        .unwrap();

    let last = stage_fqn("s3");
    for node in prepared.plan.live_nodes() {
        assert!(
            node.stage_fqn.is_empty() || node.stage_fqn == last,
            "node {} of {} stayed live",
            node.uuid,
            node.stage_fqn
        );
    }

    let identities: Vec<&Node> = prepared.plan.identity_nodes().collect();
    let identity_ids: HashSet<&str> = identities.iter().map(|n| n.uuid.as_str()).collect();
    assert_eq!(identity_ids, HashSet::from(["s1-step", "s2-step"]));
    assert_eq!(
        prepared.plan.node("s1-step").unwrap().original_node_execution_ids(),
        ids(&["ne-s1-step"])
    );

    // copied stages carry the previous execution's content
    let document = yaml::parse(&prepared.processed_yaml).unwrap();
    let stages = yaml::stages(&document, PipelineVersion::V0).unwrap();
    assert_eq!(stages[0]["__uuid"].as_str(), Some("old-s1"));
    assert_eq!(stages[1]["stage"]["spec"]["image"].as_str(), Some("old"));
    assert_eq!(stages[2]["__uuid"].as_str(), Some("old-s3"));
    assert_eq!(stages[2]["stage"]["spec"]["image"].as_str(), Some("new"));

    assert_eq!(
        prepared.retry_stages_metadata.unwrap().skip_stages_identifier,
        ids(&["s1", "s2"])
    );
}

#[tokio::test]
async fn test_retry_v1_pipeline() {
    let previous = "version: 1\nstages:\n  - id: build\n    __uuid: old-build\n    spec: {image: old}\n  - id: ship\n    __uuid: old-ship\n    spec: {image: old}\n";
    let current = "version: 1\nstages:\n  - id: build\n    __uuid: new-build\n    spec: {image: new}\n  - id: ship\n    __uuid: new-ship\n    spec: {image: new}\n";
    let (orchestrator, _) = orchestrator(previous_run(
        previous,
        &[("build", ExecutionStatus::Succeeded), ("ship", ExecutionStatus::Failed)],
    ));

    let mut request = retry(current, &["ship"], false);
    request.pipeline_version = PipelineVersion::V1;
    let prepared = orchestrator.prepare(&request).await.unwrap();

    assert!(prepared.plan.node("build-step").unwrap().is_identity());
    assert!(!prepared.plan.node("ship-step").unwrap().is_identity());
    assert!(prepared.plan.node("build").is_none());
    assert_eq!(yaml::stage_identifiers(&prepared.processed_yaml).unwrap(), ids(&["build", "ship"]));
}

const PARALLEL_PREVIOUS: &str = r#"
pipeline:
  identifier: deploy
  stages:
    - stage: {identifier: s1, __uuid: old-s1}
    - parallel:
        - stage: {identifier: p1, __uuid: old-p1}
        - stage: {identifier: p2, __uuid: old-p2}
    - stage: {identifier: s3, __uuid: old-s3}
"#;

const PARALLEL_CURRENT: &str = r#"
pipeline:
  identifier: deploy
  stages:
    - stage: {identifier: s1, __uuid: new-s1}
    - parallel:
        - stage: {identifier: p1, __uuid: new-p1}
        - stage: {identifier: p2, __uuid: new-p2}
    - stage: {identifier: s3, __uuid: new-s3}
"#;

fn parallel_run() -> StoreSnapshot {
    let mut snapshot = previous_run(
        PARALLEL_PREVIOUS,
        &[
            ("s1", ExecutionStatus::Succeeded),
            ("p1", ExecutionStatus::Failed),
            ("p2", ExecutionStatus::Succeeded),
        ],
    );
    snapshot.retry_stage_infos.insert(
        PREVIOUS.to_string(),
        vec![
            RetryStageInfo::new("s1", ExecutionStatus::Succeeded).followed_by("p1"),
            RetryStageInfo::new("p1", ExecutionStatus::Failed).followed_by("s3"),
            RetryStageInfo::new("p2", ExecutionStatus::Succeeded).followed_by("s3"),
        ],
    );
    snapshot
}

#[tokio::test]
async fn test_retry_failed_members_of_parallel_group() {
    let (orchestrator, _) = orchestrator(parallel_run());

    let prepared = orchestrator
        .prepare(&retry(PARALLEL_CURRENT, &["p1", "p2"], true))
        .await
        .unwrap();

    let metadata = prepared.retry_stages_metadata.clone().unwrap();
    assert_eq!(metadata.retry_stages_identifier, ids(&["p1"]));
    assert_eq!(metadata.skip_stages_identifier, ids(&["s1", "p2"]));

    assert!(prepared.plan.node("s1-step").unwrap().is_identity());
    assert!(prepared.plan.node("p2-step").unwrap().is_identity());
    assert!(!prepared.plan.node("p1-step").unwrap().is_identity());
    assert!(!prepared.plan.node("s3-step").unwrap().is_identity());
}

#[tokio::test]
async fn test_failed_only_retry_must_name_whole_group() {
    let (orchestrator, _) = orchestrator(parallel_run());

    let result = orchestrator
        .prepare(&retry(PARALLEL_CURRENT, &["p1"], true))
        .await;
    assert!(matches!(result, Err(ReplanError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_recorded_retry_can_be_retried_again() {
    let previous = v0_pipeline(&["s1", "s2"], "old");
    let current = v0_pipeline(&["s1", "s2"], "new");
    let mut snapshot = previous_run(
        &previous,
        &[("s1", ExecutionStatus::Succeeded), ("s2", ExecutionStatus::Failed)],
    );
    snapshot
        .execution_summaries
        .push(summary(PREVIOUS, None, chrono::Utc::now() - chrono::Duration::minutes(5)));
    snapshot.pipelines.insert("deploy".to_string(), current.clone());
    let (orchestrator, store) = orchestrator(snapshot);

    let prepared = orchestrator
        .prepare(&retry(&current, &["s2"], false))
        .await
        .unwrap();
    orchestrator.record("deploy", &prepared).await.unwrap();

    let saved = store
        .plan_execution_metadata(&prepared.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.yaml, current);
    assert_eq!(saved.processed_yaml, prepared.processed_yaml);
    assert_eq!(saved.retry_stages_metadata, prepared.retry_stages_metadata);

    let recorded = store.execution_summary(&prepared.execution_id).await.unwrap().unwrap();
    assert_eq!(recorded.root_execution_id.as_deref(), Some(PREVIOUS));
    assert!(recorded.is_latest_execution);

    let validator = RetryEligibilityValidator::new(store.clone(), store.clone(), chrono::Duration::days(30));
    assert!(validator.validate_retry("deploy", &prepared.execution_id).await.unwrap().is_resumable);

    let superseded = validator.validate_retry("deploy", PREVIOUS).await.unwrap();
    assert!(!superseded.is_resumable);
    assert_eq!(
        superseded.error_message.as_deref(),
        Some("This execution is not the latest of all retried execution. You can only retry the latest execution.")
    );

    let history = validator.retry_history(PREVIOUS, &prepared.execution_id).await.unwrap();
    assert_eq!(history.latest_execution_id.as_deref(), Some(prepared.execution_id.as_str()));
    assert_eq!(history.execution_infos.len(), 2);
}

#[tokio::test]
async fn test_repeated_strategy_becomes_single_identity() {
    let previous = v0_pipeline(&["s1", "s2"], "old");
    let current = v0_pipeline(&["s1", "s2"], "new");
    let mut snapshot = previous_run(
        &previous,
        &[("s1", ExecutionStatus::Succeeded), ("s2", ExecutionStatus::Failed)],
    );
    let matrix = node("s1-matrix", "matrix", StepCategory::Strategy, &stage_fqn("s1"));
    for repetition in 0..3 {
        snapshot.node_executions.push(ran(
            &format!("ne-matrix-{}", repetition),
            &matrix,
            ExecutionStatus::Succeeded,
            2 + repetition,
        ));
    }
    snapshot.plan_nodes.push(matrix);
    let (orchestrator, _) = orchestrator(snapshot);

    let prepared = orchestrator
        .prepare(&retry(&current, &["s2"], false))
        .await
        .unwrap();

    let matrices: Vec<&Node> = prepared
        .plan
        .identity_nodes()
        .filter(|node| node.uuid == "s1-matrix")
        .collect();
    assert_eq!(matrices.len(), 1);
    assert_eq!(
        matrices[0].original_node_execution_ids(),
        ids(&["ne-matrix-0", "ne-matrix-1", "ne-matrix-2"])
    );
}
