//! Retry eligibility
//!
//! Decides whether a previous execution may be retried and which entry points
//! a retry may start from. Ineligibility is a normal outcome reported through
//! [`RetryInfo`]; only store failures surface as errors.

use crate::core::{
    ExecutionInfo, ExecutionStatus, ExecutionSummary, PlanExecutionMetadata, RetryGroup, RetryHistory,
    RetryInfo, RetryLatestExecution, RetryStageInfo,
};
use crate::error::{ReplanError, Result};
use crate::persistence::{ExecutionRecordStore, NodeExecutionStore};
use crate::yaml;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info};

const NOT_LATEST_MESSAGE: &str =
    "This execution is not the latest of all retried execution. You can only retry the latest execution.";
const ROLLED_BACK_MESSAGE: &str =
    "This execution has undergone Pipeline Rollback, and hence cannot be retried.";
const STAGES_CHANGED_MESSAGE: &str =
    "The pipeline has been updated, stages have been added, removed or reordered. Cannot retry";

/// True iff both documents list the same stage identifiers in the same order.
///
/// Empty or unparseable input never matches.
pub fn stage_sequence_equals(updated_yaml: &str, executed_yaml: &str) -> bool {
    if updated_yaml.trim().is_empty() || executed_yaml.trim().is_empty() {
        return false;
    }

    match (
        yaml::stage_identifiers(updated_yaml),
        yaml::stage_identifiers(executed_yaml),
    ) {
        (Ok(updated), Ok(executed)) => updated == executed,
        (Err(e), _) | (_, Err(e)) => {
            debug!("Stage sequence comparison failed: {}", e);
            false
        }
    }
}

/// Partition previously run stages by the stage that ran after them.
///
/// Groups come out in the order their first member ran; the stages with no
/// successor form the last group.
pub fn compute_retry_groups(stage_infos: &[RetryStageInfo]) -> Vec<RetryGroup> {
    let mut groups: IndexMap<Option<&str>, Vec<RetryStageInfo>> = IndexMap::new();
    for info in stage_infos {
        groups
            .entry(info.next_id.as_deref())
            .or_default()
            .push(info.clone());
    }

    groups.into_values().map(|info| RetryGroup { info }).collect()
}

/// Retry info built straight from stage summaries
pub fn retry_info(stage_infos: &[RetryStageInfo]) -> RetryInfo {
    RetryInfo::resumable(compute_retry_groups(stage_infos))
}

pub fn is_failed_status(status: ExecutionStatus) -> bool {
    status.is_retryable_failure()
}

/// The single retry group holding every requested stage.
///
/// A retry restarts from exactly one entry point, so stages that did not run
/// or that belong to different groups are rejected.
pub fn select_retry_group<'a>(groups: &'a [RetryGroup], requested_stage_ids: &[String]) -> Result<&'a RetryGroup> {
    let Some(first) = requested_stage_ids.first() else {
        return Err(ReplanError::invalid_request("Retry needs at least one stage to retry"));
    };
    let group = groups
        .iter()
        .find(|group| group.contains(first))
        .ok_or_else(|| {
            ReplanError::invalid_request(format!("Stage {} did not run in the retried execution", first))
        })?;

    if let Some(outside) = requested_stage_ids.iter().find(|id| !group.contains(id)) {
        return Err(ReplanError::invalid_request(format!(
            "Stages {} and {} are not part of the same retry group",
            first, outside
        )));
    }
    Ok(group)
}

/// For "resume failed stages only" requests: the failed subset of a retry
/// group.
///
/// Every requested stage must belong to the group and no member of the group
/// may be left out of the request.
pub fn fetch_only_failed_stages(
    group: &[RetryStageInfo],
    requested_stage_ids: &[String],
) -> Result<Vec<String>> {
    if group.is_empty() || requested_stage_ids.is_empty() {
        return Err(ReplanError::invalid_request(
            "Retry of failed stages needs a retry group and at least one requested stage",
        ));
    }

    for requested in requested_stage_ids {
        if !group.iter().any(|info| info.identifier == *requested) {
            return Err(ReplanError::invalid_request(format!(
                "Stage {} is not part of the selected retry group. Retrying only failed stages is not applicable to non-parallel-group retries",
                requested
            )));
        }
    }

    if let Some(missing) = group
        .iter()
        .find(|info| !requested_stage_ids.contains(&info.identifier))
    {
        return Err(ReplanError::invalid_request(format!(
            "Stage {} of the parallel group is missing from the request. Retrying only failed stages is not applicable to non-parallel-group retries",
            missing.identifier
        )));
    }

    let failed: Vec<String> = group
        .iter()
        .filter(|info| is_failed_status(info.status))
        .map(|info| info.identifier.clone())
        .collect();

    if failed.is_empty() {
        return Err(ReplanError::invalid_request("No failed stage found in the selected retry group"));
    }
    Ok(failed)
}

/// Full retry gate and retry lineage lookups
pub struct RetryEligibilityValidator {
    records: Arc<dyn ExecutionRecordStore>,
    nodes: Arc<dyn NodeExecutionStore>,
    horizon: Duration,
}

impl RetryEligibilityValidator {
    pub fn new(
        records: Arc<dyn ExecutionRecordStore>,
        nodes: Arc<dyn NodeExecutionStore>,
        horizon: Duration,
    ) -> Self {
        Self {
            records,
            nodes,
            horizon,
        }
    }

    pub async fn validate_retry(&self, pipeline_identifier: &str, plan_execution_id: &str) -> Result<RetryInfo> {
        self.validate_retry_at(pipeline_identifier, plan_execution_id, Utc::now())
            .await
    }

    /// Same as [`validate_retry`](Self::validate_retry) with an explicit clock
    pub async fn validate_retry_at(
        &self,
        pipeline_identifier: &str,
        plan_execution_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryInfo> {
        let Some(summary) = self.records.execution_summary(plan_execution_id).await? else {
            return Ok(not_resumable(no_plan_execution(plan_execution_id)));
        };

        if let Some(reason) = check_summary(&summary) {
            return Ok(not_resumable(reason));
        }

        let Some(pipeline_yaml) = self.records.pipeline_yaml(pipeline_identifier).await? else {
            return Ok(not_resumable(format!(
                "Pipeline with the given ID: {} does not exist or has been deleted",
                pipeline_identifier
            )));
        };

        // a deadline past the end of time never expires
        let expired = summary
            .created_at
            .checked_add_signed(self.horizon)
            .is_some_and(|deadline| deadline < now);
        if expired {
            return Ok(not_resumable(format!(
                "Execution is more than {} days old. Cannot retry",
                self.horizon.num_days()
            )));
        }

        let Some(metadata) = self.records.plan_execution_metadata(plan_execution_id).await? else {
            return Ok(not_resumable(no_plan_execution(plan_execution_id)));
        };

        if !executed_stages_unchanged(&pipeline_yaml, &metadata) {
            return Ok(not_resumable(STAGES_CHANGED_MESSAGE));
        }

        let stage_infos = self.nodes.fetch_retry_stage_infos(plan_execution_id).await?;
        let info = retry_info(&stage_infos);
        debug!(
            "Execution {} is resumable from {} group(s)",
            plan_execution_id,
            info.groups.len()
        );
        Ok(info)
    }

    /// All executions of a retry lineage, newest first
    pub async fn retry_history(&self, root_execution_id: &str, plan_execution_id: &str) -> Result<RetryHistory> {
        let lineage: Vec<ExecutionSummary> = self.records.summaries_by_root(root_execution_id).await?.collect();
        if lineage.len() <= 1 {
            return Ok(RetryHistory::failed(not_retried(root_execution_id)));
        }

        if self
            .records
            .plan_execution_metadata(plan_execution_id)
            .await?
            .is_none()
        {
            return Ok(RetryHistory::failed(no_plan_execution(plan_execution_id)));
        }

        Ok(RetryHistory {
            latest_execution_id: Some(lineage[0].plan_execution_id.clone()),
            execution_infos: lineage.iter().map(ExecutionInfo::from).collect(),
            error_message: None,
        })
    }

    pub async fn latest_execution_id(&self, root_execution_id: &str) -> Result<RetryLatestExecution> {
        let mut lineage = self.records.summaries_by_root(root_execution_id).await?;
        let latest = lineage.next();
        let retried = lineage.next().is_some();
        lineage.close();

        match latest {
            Some(latest) if retried => Ok(RetryLatestExecution {
                latest_execution_id: Some(latest.plan_execution_id),
                error_message: None,
            }),
            _ => Ok(RetryLatestExecution {
                latest_execution_id: None,
                error_message: Some(not_retried(root_execution_id)),
            }),
        }
    }
}

/// Lineage checks that need nothing but the summary
fn check_summary(summary: &ExecutionSummary) -> Option<&'static str> {
    if !summary.is_latest_execution {
        return Some(NOT_LATEST_MESSAGE);
    }
    if summary.rollback_mode_execution_id.is_some() {
        return Some(ROLLED_BACK_MESSAGE);
    }
    None
}

/// Compare the current pipeline with what actually ran. A selective-stage
/// execution is compared against the current pipeline cut down to the stages
/// it ran.
fn executed_stages_unchanged(pipeline_yaml: &str, metadata: &PlanExecutionMetadata) -> bool {
    match &metadata.stages_execution_metadata {
        Some(stages) if stages.is_stages_execution => {
            match yaml::retain_stages(pipeline_yaml, &stages.stage_identifiers) {
                Ok(selected) => stage_sequence_equals(&selected, &metadata.yaml),
                Err(e) => {
                    debug!("Failed to select executed stages from pipeline: {}", e);
                    false
                }
            }
        }
        _ => stage_sequence_equals(pipeline_yaml, &metadata.yaml),
    }
}

fn not_resumable(reason: impl Into<String>) -> RetryInfo {
    let reason = reason.into();
    info!("Retry not allowed: {}", reason);
    RetryInfo::not_resumable(reason)
}

fn no_plan_execution(plan_execution_id: &str) -> String {
    format!("No Plan Execution exists for id {}", plan_execution_id)
}

fn not_retried(root_execution_id: &str) -> String {
    format!("Execution {} has not been retried yet", root_execution_id)
}
