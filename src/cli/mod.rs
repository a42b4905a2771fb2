//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CheckCommand, HistoryCommand, ImportCommand, RetryCommand, RollbackCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Retry and rollback plan rewriting for pipeline executions
#[derive(Debug, Parser, Clone)]
#[command(name = "replan")]
#[command(version = "0.1.0")]
#[command(about = "Prepare retry and rollback plans from previous pipeline executions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to replan configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Read previous executions from a YAML/JSON snapshot instead of the database
    #[arg(short, long, global = true)]
    pub snapshot: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Check whether an execution can be retried
    Check(CheckCommand),

    /// Prepare a retry of a previous execution
    Retry(RetryCommand),

    /// Prepare a rollback of a previous execution
    Rollback(RollbackCommand),

    /// Show the retry lineage of an execution
    History(HistoryCommand),

    /// Load a snapshot of previous executions into the database
    Import(ImportCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
