//! End-to-end retry and rollback scenarios

#[path = "../helpers.rs"]
mod helpers;

mod eligibility;
mod retry_flow;
mod rollback_flow;
