//! Core domain models
//!
//! This module defines the plan and node structures the transformers rewrite,
//! the persisted execution records they read, and engine configuration.

pub mod config;
pub mod metadata;
pub mod node;
pub mod node_execution;
pub mod plan;
pub mod state;

pub use config::ReplanConfig;
pub use metadata::*;
pub use node::*;
pub use node_execution::*;
pub use plan::Plan;
pub use state::*;
