//! CLI command definitions

use crate::yaml::PipelineVersion;
use clap::Args;
use std::path::PathBuf;

/// Check retry eligibility
#[derive(Debug, Args, Clone)]
pub struct CheckCommand {
    /// Pipeline identifier
    #[arg(short, long)]
    pub pipeline: String,

    /// Plan execution id to check
    #[arg(short, long)]
    pub execution: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Prepare a retry
#[derive(Debug, Args, Clone)]
pub struct RetryCommand {
    /// Pipeline identifier
    #[arg(short, long)]
    pub pipeline: String,

    /// Plan execution id being retried
    #[arg(short, long)]
    pub execution: String,

    /// Freshly processed pipeline YAML
    #[arg(long)]
    pub yaml: PathBuf,

    /// Compiled plan (YAML or JSON)
    #[arg(long)]
    pub plan: PathBuf,

    /// Stage to retry from (repeat for a parallel group)
    #[arg(long = "stage", required = true)]
    pub stages: Vec<String>,

    /// Retry only the failed stages of the parallel group
    #[arg(long)]
    pub failed_only: bool,

    /// Pipeline YAML version (detected when omitted)
    #[arg(long)]
    pub pipeline_version: Option<PipelineVersion>,

    /// Record the prepared execution as the latest attempt so it can be retried later
    #[arg(long)]
    pub save: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Prepare a rollback
#[derive(Debug, Args, Clone)]
pub struct RollbackCommand {
    /// Plan execution id being rolled back
    #[arg(short, long)]
    pub execution: String,

    /// Processed pipeline YAML of the rolled back execution
    #[arg(long)]
    pub yaml: PathBuf,

    /// Compiled plan (YAML or JSON)
    #[arg(long)]
    pub plan: PathBuf,

    /// Roll back only these stages (post-execution rollback)
    #[arg(long = "stage")]
    pub stages: Vec<String>,

    /// Plan node to keep live
    #[arg(long = "preserve")]
    pub preserve: Vec<String>,

    /// Pipeline YAML version (detected when omitted)
    #[arg(long)]
    pub pipeline_version: Option<PipelineVersion>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the retry lineage
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Root execution of the lineage
    #[arg(short, long)]
    pub root: String,

    /// Execution the lineage is looked up for
    #[arg(short, long)]
    pub execution: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Import a snapshot into the database
#[derive(Debug, Args, Clone)]
pub struct ImportCommand {
    /// Snapshot file (YAML or JSON)
    #[arg(short, long)]
    pub file: PathBuf,
}
