//! Retry and rollback plan preparation

pub mod eligibility;
pub mod orchestrator;
pub mod retry;
pub mod rollback;

pub use eligibility::{
    compute_retry_groups, fetch_only_failed_stages, retry_info, select_retry_group, stage_sequence_equals,
    RetryEligibilityValidator,
};
pub use orchestrator::{
    ExecutionModeOrchestrator, ExecutionRequest, PlanCompiler, PreparedExecution, RetryRequest,
};
pub use retry::RetryPlanTransformer;
pub use rollback::{RollbackPlanTransformer, RollbackRequest};
