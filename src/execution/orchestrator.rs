//! Execution mode dispatch
//!
//! Picks the YAML and plan rewrites for an execution start and hands back a
//! prepared, immutable plan.

use crate::core::{
    ExecutionMode, ExecutionStatus, ExecutionSummary, Plan, PlanExecutionMetadata, RetryStagesMetadata,
    StagesExecutionMetadata,
};
use crate::error::{ReplanError, Result};
use crate::execution::eligibility::{compute_retry_groups, fetch_only_failed_stages, select_retry_group};
use crate::execution::retry::RetryPlanTransformer;
use crate::execution::rollback::{RollbackPlanTransformer, RollbackRequest};
use crate::persistence::{ExecutionRecordStore, NodeExecutionStore};
use crate::yaml::{self, PipelineVersion};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Compiles processed YAML into a plan. Compilation itself lives outside
/// this crate.
pub trait PlanCompiler: Send + Sync {
    fn compile(&self, processed_yaml: &str, version: PipelineVersion) -> Result<Plan>;
}

impl<F> PlanCompiler for F
where
    F: Fn(&str, PipelineVersion) -> Result<Plan> + Send + Sync,
{
    fn compile(&self, processed_yaml: &str, version: PipelineVersion) -> Result<Plan> {
        self(processed_yaml, version)
    }
}

/// Retry parameters of a `Normal` execution start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryRequest {
    pub stage_identifiers: Vec<String>,
    /// Re-run only the failed stages of the selected parallel group
    pub failed_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionRequest {
    pub mode: ExecutionMode,
    /// Freshly rendered YAML for this attempt. For post-execution rollback it
    /// is already cut down to the selected stages.
    pub processed_yaml: String,
    pub pipeline_version: PipelineVersion,
    pub previous_execution_id: Option<String>,
    pub retry: Option<RetryRequest>,
    pub rollback_stage_fqns: Vec<String>,
    pub preserve_node_ids: Vec<String>,
}

impl ExecutionRequest {
    pub fn normal(processed_yaml: impl Into<String>) -> Self {
        Self {
            mode: ExecutionMode::Normal,
            processed_yaml: processed_yaml.into(),
            ..Default::default()
        }
    }

    pub fn retry(
        processed_yaml: impl Into<String>,
        previous_execution_id: impl Into<String>,
        retry: RetryRequest,
    ) -> Self {
        Self {
            mode: ExecutionMode::Normal,
            processed_yaml: processed_yaml.into(),
            previous_execution_id: Some(previous_execution_id.into()),
            retry: Some(retry),
            ..Default::default()
        }
    }

    pub fn rollback(
        mode: ExecutionMode,
        processed_yaml: impl Into<String>,
        previous_execution_id: impl Into<String>,
        rollback_stage_fqns: Vec<String>,
    ) -> Self {
        Self {
            mode,
            processed_yaml: processed_yaml.into(),
            previous_execution_id: Some(previous_execution_id.into()),
            rollback_stage_fqns,
            ..Default::default()
        }
    }

    fn require_previous(&self) -> Result<&str> {
        self.previous_execution_id
            .as_deref()
            .ok_or_else(|| ReplanError::invalid_request(format!("{} execution needs a previous execution id", self.mode)))
    }
}

/// Everything execution start needs for a new attempt
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedExecution {
    pub execution_id: String,
    pub mode: ExecutionMode,
    pub previous_execution_id: Option<String>,
    /// YAML submitted for this attempt, before any retry or rollback rewrite
    pub yaml: String,
    pub processed_yaml: String,
    pub plan: Plan,
    pub stages_execution_metadata: Option<StagesExecutionMetadata>,
    pub retry_stages_metadata: Option<RetryStagesMetadata>,
}

pub struct ExecutionModeOrchestrator {
    compiler: Arc<dyn PlanCompiler>,
    records: Arc<dyn ExecutionRecordStore>,
    nodes: Arc<dyn NodeExecutionStore>,
    retry: RetryPlanTransformer,
    rollback: RollbackPlanTransformer,
}

impl ExecutionModeOrchestrator {
    pub fn new(
        compiler: Arc<dyn PlanCompiler>,
        records: Arc<dyn ExecutionRecordStore>,
        nodes: Arc<dyn NodeExecutionStore>,
    ) -> Self {
        Self {
            compiler,
            records,
            retry: RetryPlanTransformer::new(Arc::clone(&nodes)),
            rollback: RollbackPlanTransformer::new(Arc::clone(&nodes)),
            nodes,
        }
    }

    pub async fn prepare(&self, request: &ExecutionRequest) -> Result<PreparedExecution> {
        debug!("Preparing {} execution", request.mode);
        match request.mode {
            ExecutionMode::Normal => match &request.retry {
                Some(retry) => self.prepare_retry(request, retry).await,
                None => self.prepare_normal(request),
            },
            ExecutionMode::PipelineRollback | ExecutionMode::PostExecutionRollback => {
                self.prepare_rollback(request).await
            }
            ExecutionMode::Undefined => Err(ReplanError::UnsupportedMode(request.mode.to_string())),
        }
    }

    fn prepare_normal(&self, request: &ExecutionRequest) -> Result<PreparedExecution> {
        let plan = self
            .compiler
            .compile(&request.processed_yaml, request.pipeline_version)?;
        Ok(prepared(request, request.processed_yaml.clone(), plan))
    }

    async fn prepare_retry(&self, request: &ExecutionRequest, retry: &RetryRequest) -> Result<PreparedExecution> {
        let previous_execution_id = request.require_previous()?;
        if retry.stage_identifiers.is_empty() {
            return Err(ReplanError::invalid_request("Retry needs at least one stage to retry"));
        }

        let previous = self
            .records
            .plan_execution_metadata(previous_execution_id)
            .await?
            .ok_or_else(|| {
                ReplanError::internal(format!(
                    "Plan execution metadata missing for retried execution {}",
                    previous_execution_id
                ))
            })?;

        let stage_infos = self.nodes.fetch_retry_stage_infos(previous_execution_id).await?;
        let groups = compute_retry_groups(&stage_infos);
        let group = select_retry_group(&groups, &retry.stage_identifiers)?;
        let retry_stages = if retry.failed_only {
            fetch_only_failed_stages(&group.info, &retry.stage_identifiers)?
        } else {
            retry.stage_identifiers.clone()
        };

        let rewritten = yaml::retry_processed_yaml(
            &previous.processed_yaml,
            &request.processed_yaml,
            &retry_stages,
            request.pipeline_version,
        );
        let compiled = self
            .compiler
            .compile(&rewritten.yaml, request.pipeline_version)?;
        let plan = self
            .retry
            .transform(
                &compiled,
                &rewritten.skipped_stage_identifiers,
                &retry_stages,
                previous_execution_id,
            )
            .await?;

        info!(
            "Retrying execution {} from {:?}, reusing {} stage(s)",
            previous_execution_id,
            retry_stages,
            rewritten.skipped_stage_identifiers.len()
        );
        let mut execution = prepared(request, rewritten.yaml, plan);
        execution.stages_execution_metadata = previous.stages_execution_metadata;
        execution.retry_stages_metadata = Some(RetryStagesMetadata {
            retry_stages_identifier: retry_stages,
            skip_stages_identifier: rewritten.skipped_stage_identifiers,
        });
        Ok(execution)
    }

    async fn prepare_rollback(&self, request: &ExecutionRequest) -> Result<PreparedExecution> {
        let previous_execution_id = request.require_previous()?;

        let processed_yaml = yaml::reverse_and_filter_stages(&request.processed_yaml)?;
        let compiled = self
            .compiler
            .compile(&processed_yaml, request.pipeline_version)?;

        let rollback = RollbackRequest {
            previous_execution_id: previous_execution_id.to_string(),
            mode: request.mode,
            selected_stage_fqns: request.rollback_stage_fqns.clone(),
            preserve_node_ids: request.preserve_node_ids.clone(),
        };
        let plan = self.rollback.transform(&compiled, &rollback).await?;

        info!("Prepared {} of execution {}", request.mode, previous_execution_id);
        Ok(prepared(request, processed_yaml, plan))
    }

    /// Persist a prepared execution as a new attempt of `pipeline_identifier`.
    ///
    /// A retry joins the lineage of the execution it retries and supersedes
    /// it as the latest attempt. A rollback marks the rolled back execution.
    pub async fn record(&self, pipeline_identifier: &str, execution: &PreparedExecution) -> Result<()> {
        let now = Utc::now();
        let mut root_execution_id = None;

        if let Some(previous_id) = &execution.previous_execution_id {
            let previous = self.records.execution_summary(previous_id).await?;
            match execution.mode {
                ExecutionMode::Normal => {
                    root_execution_id = Some(
                        previous
                            .as_ref()
                            .map_or(previous_id.as_str(), ExecutionSummary::lineage_id)
                            .to_string(),
                    );
                    if let Some(mut previous) = previous {
                        previous.is_latest_execution = false;
                        self.records.save_execution_summary(&previous).await?;
                    }
                }
                _ => {
                    if let Some(mut previous) = previous {
                        previous.rollback_mode_execution_id = Some(execution.execution_id.clone());
                        self.records.save_execution_summary(&previous).await?;
                    }
                }
            }
        }

        self.records
            .save_plan_execution_metadata(&PlanExecutionMetadata {
                plan_execution_id: execution.execution_id.clone(),
                yaml: execution.yaml.clone(),
                processed_yaml: execution.processed_yaml.clone(),
                stages_execution_metadata: execution.stages_execution_metadata.clone(),
                retry_stages_metadata: execution.retry_stages_metadata.clone(),
            })
            .await?;
        self.records
            .save_execution_summary(&ExecutionSummary {
                plan_execution_id: execution.execution_id.clone(),
                pipeline_identifier: pipeline_identifier.to_string(),
                root_execution_id,
                is_latest_execution: true,
                created_at: now,
                start_ts: Some(now),
                end_ts: None,
                status: ExecutionStatus::NotStarted,
                rollback_mode_execution_id: None,
            })
            .await?;

        info!("Recorded {} execution {}", execution.mode, execution.execution_id);
        Ok(())
    }
}

fn prepared(request: &ExecutionRequest, processed_yaml: String, plan: Plan) -> PreparedExecution {
    PreparedExecution {
        execution_id: Uuid::new_v4().to_string(),
        mode: request.mode,
        previous_execution_id: request.previous_execution_id.clone(),
        yaml: request.processed_yaml.clone(),
        processed_yaml,
        plan,
        stages_execution_metadata: None,
        retry_stages_metadata: None,
    }
}
