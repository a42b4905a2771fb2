//! Execution metadata persisted alongside each plan execution

use crate::core::state::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage selection of a scoped ("run selected stages") execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagesExecutionMetadata {
    #[serde(default)]
    pub is_stages_execution: bool,

    #[serde(default)]
    pub stage_identifiers: Vec<String>,
}

/// Which stages a retry re-ran and which it copied forward
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStagesMetadata {
    pub retry_stages_identifier: Vec<String>,
    pub skip_stages_identifier: Vec<String>,
}

/// Stage-level summary of a previous execution.
///
/// `next_id` is the identifier of the stage that ran right after this one;
/// the last stage has none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStageInfo {
    pub identifier: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub parent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<String>,

    #[serde(default)]
    pub status: ExecutionStatus,

    #[serde(default)]
    pub created_at: i64,
}

impl RetryStageInfo {
    pub fn new(identifier: impl Into<String>, status: ExecutionStatus) -> Self {
        let identifier = identifier.into();
        Self {
            name: identifier.clone(),
            identifier,
            status,
            ..Default::default()
        }
    }

    pub fn followed_by(mut self, next_id: impl Into<String>) -> Self {
        self.next_id = Some(next_id.into());
        self
    }
}

/// Stages sharing a successor: one valid retry entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryGroup {
    pub info: Vec<RetryStageInfo>,
}

impl RetryGroup {
    pub fn contains(&self, identifier: &str) -> bool {
        self.info.iter().any(|stage| stage.identifier == identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.info.iter().map(|stage| stage.identifier.as_str())
    }
}

/// Outcome of a retry eligibility check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub is_resumable: bool,

    #[serde(default)]
    pub groups: Vec<RetryGroup>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RetryInfo {
    pub fn resumable(groups: Vec<RetryGroup>) -> Self {
        Self {
            is_resumable: true,
            groups,
            error_message: None,
        }
    }

    pub fn not_resumable(message: impl Into<String>) -> Self {
        Self {
            is_resumable: false,
            groups: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// Persisted record of what a plan execution actually ran
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanExecutionMetadata {
    pub plan_execution_id: String,

    /// Pipeline YAML as submitted
    #[serde(default)]
    pub yaml: String,

    /// YAML after input and template resolution, with `__uuid` markers
    #[serde(default)]
    pub processed_yaml: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages_execution_metadata: Option<StagesExecutionMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_stages_metadata: Option<RetryStagesMetadata>,
}

/// List-view summary of a pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub plan_execution_id: String,

    pub pipeline_identifier: String,

    /// First execution of the retry lineage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_execution_id: Option<String>,

    #[serde(default = "default_latest")]
    pub is_latest_execution: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: ExecutionStatus,

    /// Set once the execution has been rolled back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_mode_execution_id: Option<String>,
}

fn default_latest() -> bool {
    true
}

impl ExecutionSummary {
    /// Id of the retry lineage this execution belongs to
    pub fn lineage_id(&self) -> &str {
        self.root_execution_id
            .as_deref()
            .unwrap_or(&self.plan_execution_id)
    }
}

/// One entry of a retry lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub plan_execution_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
}

impl From<&ExecutionSummary> for ExecutionInfo {
    fn from(summary: &ExecutionSummary) -> Self {
        Self {
            plan_execution_id: summary.plan_execution_id.clone(),
            status: summary.status,
            start_ts: summary.start_ts,
            end_ts: summary.end_ts,
        }
    }
}

/// All executions of a retry lineage, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_execution_id: Option<String>,

    #[serde(default)]
    pub execution_infos: Vec<ExecutionInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RetryHistory {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            latest_execution_id: None,
            execution_infos: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// Latest execution of a retry lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryLatestExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_execution_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
