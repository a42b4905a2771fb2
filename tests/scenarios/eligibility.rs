//! Retry eligibility and retry lineage

use crate::helpers::*;
use chrono::Duration;
use pretty_assertions::assert_eq;
use replan::core::{ExecutionStatus, ReplanConfig, RetryStageInfo, StagesExecutionMetadata};
use replan::error::ReplanError;
use replan::execution::{fetch_only_failed_stages, stage_sequence_equals, RetryEligibilityValidator};
use replan::persistence::{InMemoryStore, StoreSnapshot};
use std::sync::Arc;

const PIPELINE: &str = "deploy";

fn eligible_run() -> StoreSnapshot {
    let executed = v0_pipeline(&["s1", "s2", "s3"], "run");
    let mut snapshot = previous_run(
        &executed,
        &[("s1", ExecutionStatus::Succeeded), ("s2", ExecutionStatus::Failed)],
    );
    snapshot
        .execution_summaries
        .push(summary(PREVIOUS, None, at_minute(0)));
    snapshot.pipelines.insert(PIPELINE.to_string(), executed);
    snapshot.retry_stage_infos.insert(
        PREVIOUS.to_string(),
        vec![
            RetryStageInfo::new("s1", ExecutionStatus::Succeeded).followed_by("s2"),
            RetryStageInfo::new("s2", ExecutionStatus::Failed),
        ],
    );
    snapshot
}

fn validator(snapshot: StoreSnapshot) -> RetryEligibilityValidator {
    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    RetryEligibilityValidator::new(store.clone(), store, Duration::days(30))
}

async fn check(snapshot: StoreSnapshot) -> replan::core::RetryInfo {
    validator(snapshot)
        .validate_retry_at(PIPELINE, PREVIOUS, at_minute(60))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unchanged_pipeline_is_resumable() {
    let info = check(eligible_run()).await;
    assert!(info.is_resumable);
    assert_eq!(info.groups.len(), 2);
    assert_eq!(info.groups[1].identifiers().collect::<Vec<_>>(), vec!["s2"]);
}

#[tokio::test]
async fn test_swapped_stages_block_retry() {
    let executed = v0_pipeline(&["s1", "s2", "s3"], "run");
    let swapped = v0_pipeline(&["s2", "s1", "s3"], "run");
    assert!(stage_sequence_equals(&executed, &executed));
    assert!(!stage_sequence_equals(&swapped, &executed));

    let mut snapshot = eligible_run();
    snapshot.pipelines.insert(PIPELINE.to_string(), swapped);
    let info = check(snapshot).await;
    assert!(!info.is_resumable);
    assert_eq!(
        info.error_message.as_deref(),
        Some("The pipeline has been updated, stages have been added, removed or reordered. Cannot retry")
    );
}

#[tokio::test]
async fn test_selective_stage_execution_compares_executed_stages() {
    let mut snapshot = eligible_run();
    let executed = v0_pipeline(&["s1", "s3"], "run");
    snapshot.plan_execution_metadata[0].yaml = executed;
    snapshot.plan_execution_metadata[0].stages_execution_metadata = Some(StagesExecutionMetadata {
        is_stages_execution: true,
        stage_identifiers: ids(&["s1", "s3"]),
    });

    assert!(check(snapshot).await.is_resumable);
}

#[tokio::test]
async fn test_ineligible_executions() {
    let mut not_latest = eligible_run();
    not_latest.execution_summaries[0].is_latest_execution = false;

    let mut rolled_back = eligible_run();
    rolled_back.execution_summaries[0].rollback_mode_execution_id = Some("rollback-1".to_string());

    let mut deleted = eligible_run();
    deleted.pipelines.clear();

    let mut no_metadata = eligible_run();
    no_metadata.plan_execution_metadata.clear();

    let mut no_summary = eligible_run();
    no_summary.execution_summaries.clear();

    let cases = [
        (
            not_latest,
            "This execution is not the latest of all retried execution. You can only retry the latest execution.",
        ),
        (rolled_back, "This execution has undergone Pipeline Rollback, and hence cannot be retried."),
        (deleted, "Pipeline with the given ID: deploy does not exist or has been deleted"),
        (no_metadata, "No Plan Execution exists for id exec-1"),
        (no_summary, "No Plan Execution exists for id exec-1"),
    ];

    for (snapshot, message) in cases {
        let info = check(snapshot).await;
        assert!(!info.is_resumable);
        assert_eq!(info.error_message.as_deref(), Some(message));
    }
}

#[tokio::test]
async fn test_retry_horizon() {
    let validator = validator(eligible_run());

    let within = at_minute(0) + Duration::days(29);
    assert!(validator.validate_retry_at(PIPELINE, PREVIOUS, within).await.unwrap().is_resumable);

    let past = at_minute(0) + Duration::days(31);
    let info = validator.validate_retry_at(PIPELINE, PREVIOUS, past).await.unwrap();
    assert_eq!(
        info.error_message.as_deref(),
        Some("Execution is more than 30 days old. Cannot retry")
    );
}

#[tokio::test]
async fn test_unbounded_horizon_never_expires() {
    let config = ReplanConfig {
        retry_horizon_days: i64::MAX,
        database_path: None,
    };
    let store = Arc::new(InMemoryStore::from_snapshot(eligible_run()));
    let validator = RetryEligibilityValidator::new(store.clone(), store, config.retry_horizon());

    let much_later = at_minute(0) + Duration::days(365 * 100);
    let info = validator.validate_retry_at(PIPELINE, PREVIOUS, much_later).await.unwrap();
    assert!(info.is_resumable);
}

#[test]
fn test_only_failed_members_are_retried() {
    let group = vec![
        RetryStageInfo::new("s1", ExecutionStatus::Succeeded),
        RetryStageInfo::new("s2", ExecutionStatus::Failed),
        RetryStageInfo::new("s3", ExecutionStatus::NotStarted),
    ];

    assert_eq!(
        fetch_only_failed_stages(&group, &ids(&["s1", "s2", "s3"])).unwrap(),
        ids(&["s2"])
    );
    assert!(matches!(
        fetch_only_failed_stages(&group, &ids(&["s1", "s2"])),
        Err(ReplanError::InvalidRequest(_))
    ));
    assert!(matches!(
        fetch_only_failed_stages(&group, &ids(&["s1", "s2", "s3", "s4"])),
        Err(ReplanError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_retry_history_newest_first() {
    let mut snapshot = eligible_run();
    snapshot
        .execution_summaries
        .push(summary("exec-2", Some(PREVIOUS), at_minute(30)));
    snapshot
        .execution_summaries
        .push(summary("exec-3", Some(PREVIOUS), at_minute(90)));
    let validator = validator(snapshot);

    let history = validator.retry_history(PREVIOUS, PREVIOUS).await.unwrap();
    assert_eq!(history.latest_execution_id.as_deref(), Some("exec-3"));
    let order: Vec<&str> = history
        .execution_infos
        .iter()
        .map(|info| info.plan_execution_id.as_str())
        .collect();
    assert_eq!(order, vec!["exec-3", "exec-2", "exec-1"]);

    let latest = validator.latest_execution_id(PREVIOUS).await.unwrap();
    assert_eq!(latest.latest_execution_id.as_deref(), Some("exec-3"));
}

#[tokio::test]
async fn test_lineage_without_retries() {
    let validator = validator(eligible_run());

    let history = validator.retry_history(PREVIOUS, PREVIOUS).await.unwrap();
    assert!(history.execution_infos.is_empty());
    assert!(history.error_message.is_some());

    let latest = validator.latest_execution_id(PREVIOUS).await.unwrap();
    assert!(latest.latest_execution_id.is_none());
    assert!(latest.error_message.is_some());
}
