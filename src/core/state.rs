//! Execution status and execution mode models

use crate::error::ReplanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a node or stage execution as recorded by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Never started (the run stopped before reaching it)
    NotStarted,
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Aborted,
    Expired,
    ApprovalRejected,
    /// Failed, but the failure strategy ignored it
    IgnoreFailed,
    Skipped,
}

impl ExecutionStatus {
    /// Statuses a "resume failed stages only" request will pick up
    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Aborted
                | ExecutionStatus::Failed
                | ExecutionStatus::Expired
                | ExecutionStatus::ApprovalRejected
        )
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        ExecutionStatus::NotStarted
    }
}

/// Mode an execution attempt runs in.
///
/// Retry has no dedicated value: a retry is a `Normal` run that carries
/// retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Zero value of the wire enum; never valid for an execution start
    Undefined,
    Normal,
    PipelineRollback,
    PostExecutionRollback,
}

impl ExecutionMode {
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            ExecutionMode::PipelineRollback | ExecutionMode::PostExecutionRollback
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Undefined => "UNDEFINED",
            ExecutionMode::Normal => "NORMAL",
            ExecutionMode::PipelineRollback => "PIPELINE_ROLLBACK",
            ExecutionMode::PostExecutionRollback => "POST_EXECUTION_ROLLBACK",
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Normal
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = ReplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NORMAL" => Ok(ExecutionMode::Normal),
            "PIPELINE_ROLLBACK" => Ok(ExecutionMode::PipelineRollback),
            "POST_EXECUTION_ROLLBACK" => Ok(ExecutionMode::PostExecutionRollback),
            _ => Err(ReplanError::UnsupportedMode(s.to_string())),
        }
    }
}
