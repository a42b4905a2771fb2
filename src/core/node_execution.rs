//! Persisted node execution records
//!
//! These are written by the execution runtime and are read-only here.

use crate::core::node::{StepCategory, StepType};
use crate::core::state::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group name the runtime gives to the level that holds the stage list
pub const STAGES_GROUP: &str = "STAGES";

/// Level identifier of a parallel block, never part of an FQN
const PARALLEL_IDENTIFIER: &str = "parallel";

/// Repetition marker of a strategy-spawned level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetadata {
    pub current_iteration: u32,
    pub total_iterations: u32,
}

/// One frame of the call path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Level {
    #[serde(default)]
    pub runtime_id: String,

    /// Plan node this level executes
    #[serde(default)]
    pub setup_id: String,

    #[serde(default)]
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_category: Option<StepCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metadata: Option<StrategyMetadata>,

    /// Level is left out of expression paths and FQNs
    #[serde(default)]
    pub skip_expression_chain: bool,
}

impl Level {
    pub fn new(identifier: impl Into<String>, step_category: StepCategory) -> Self {
        Self {
            identifier: identifier.into(),
            step_category: Some(step_category),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    fn is_stages_group(&self) -> bool {
        self.group.as_deref() == Some(STAGES_GROUP)
    }
}

/// Execution context: the ordered stack of levels from pipeline to current node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ambiance {
    #[serde(default)]
    pub plan_execution_id: String,

    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(plan_execution_id: impl Into<String>, levels: Vec<Level>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            levels,
        }
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Whether the current level is a strategy that repeats whole stages,
    /// as opposed to a loop nested inside a stage.
    ///
    /// True when the parent level is the stage list, or when the parent is a
    /// fork whose own parent is the stage list (strategy inside a parallel
    /// block of stages).
    pub fn is_current_strategy_level_at_stage(&self) -> bool {
        let len = self.levels.len();
        if len < 2 {
            return false;
        }

        let parent = &self.levels[len - 2];
        if parent.is_stages_group() {
            return true;
        }

        len >= 3
            && parent.step_category == Some(StepCategory::Fork)
            && self.levels[len - 3].is_stages_group()
    }

    /// Fully-qualified name of the current node built from level identifiers
    pub fn fqn(&self) -> String {
        self.levels
            .iter()
            .filter(|level| !level.skip_expression_chain && level.identifier != PARALLEL_IDENTIFIER)
            .map(|level| level.identifier.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Persisted runtime record of one node actually running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: String,

    pub plan_execution_id: String,

    /// Plan node this execution ran
    pub node_id: String,

    #[serde(default)]
    pub identifier: String,

    pub step_type: StepType,

    #[serde(default)]
    pub stage_fqn: String,

    #[serde(default)]
    pub status: ExecutionStatus,

    #[serde(default)]
    pub ambiance: Ambiance,

    /// Superseded by an in-run retry of the same node
    #[serde(default)]
    pub old_retry: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl NodeExecution {
    pub fn category(&self) -> StepCategory {
        self.step_type.category
    }
}

/// Field subset a caller needs from streamed node executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    Full,
    /// Enough to build identity nodes: ids, step type, stage path and status
    Identity,
}

impl Projection {
    pub fn apply(&self, execution: &NodeExecution) -> NodeExecution {
        match self {
            Projection::Full => execution.clone(),
            Projection::Identity => NodeExecution {
                uuid: execution.uuid.clone(),
                plan_execution_id: execution.plan_execution_id.clone(),
                node_id: execution.node_id.clone(),
                identifier: execution.identifier.clone(),
                step_type: execution.step_type.clone(),
                stage_fqn: execution.stage_fqn.clone(),
                status: execution.status,
                ambiance: Ambiance::default(),
                old_retry: execution.old_retry,
                start_ts: None,
                parent_id: None,
            },
        }
    }
}
