//! replan - retry and rollback plan rewriting for pipeline executions

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod yaml;

// Re-export commonly used types
pub use crate::core::{ExecutionMode, ExecutionStatus, Node, NodeExecution, Plan, ReplanConfig};
pub use error::{ReplanError, Result};
pub use execution::{
    ExecutionModeOrchestrator, ExecutionRequest, PlanCompiler, PreparedExecution,
    RetryEligibilityValidator, RetryRequest,
};
pub use persistence::{ExecutionRecordStore, InMemoryStore, NodeExecutionStore, StoreSnapshot};
pub use yaml::PipelineVersion;
