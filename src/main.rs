use anyhow::{Context, Result};
use replan::cli::commands::{CheckCommand, HistoryCommand, ImportCommand, RetryCommand, RollbackCommand};
use replan::cli::output::*;
use replan::cli::{Cli, Command};
use replan::core::{ExecutionMode, Plan, ReplanConfig};
use replan::execution::{
    ExecutionModeOrchestrator, ExecutionRequest, PlanCompiler, RetryEligibilityValidator, RetryRequest,
};
use replan::persistence::{ExecutionRecordStore, InMemoryStore, NodeExecutionStore, StoreSnapshot};
use replan::yaml::{self, PipelineVersion};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => ReplanConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ReplanConfig::default(),
    };

    // Execute command
    match &cli.command {
        Command::Check(cmd) => check_retry(cmd, &cli, &config).await?,
        Command::Retry(cmd) => prepare_retry(cmd, &cli, &config).await?,
        Command::Rollback(cmd) => prepare_rollback(cmd, &cli, &config).await?,
        Command::History(cmd) => show_history(cmd, &cli, &config).await?,
        Command::Import(cmd) => import_snapshot(cmd, &config).await?,
    }

    Ok(())
}

struct Stores {
    records: Arc<dyn ExecutionRecordStore>,
    nodes: Arc<dyn NodeExecutionStore>,
}

async fn open_stores(cli: &Cli, config: &ReplanConfig) -> Result<Stores> {
    if let Some(path) = &cli.snapshot {
        debug!("Reading previous executions from {}", path.display());
        let store = Arc::new(InMemoryStore::from_snapshot(StoreSnapshot::from_file(path)?));
        return Ok(Stores {
            records: store.clone(),
            nodes: store,
        });
    }
    open_database(config).await
}

#[cfg(feature = "sqlite")]
async fn open_database(config: &ReplanConfig) -> Result<Stores> {
    let path = config.resolved_database_path();
    debug!("Opening execution database {}", path.display());
    let store = Arc::new(replan::persistence::SqliteStore::open(&path).await?);
    Ok(Stores {
        records: store.clone(),
        nodes: store,
    })
}

#[cfg(not(feature = "sqlite"))]
async fn open_database(_config: &ReplanConfig) -> Result<Stores> {
    anyhow::bail!("Built without SQLite support, pass --snapshot")
}

fn read_yaml(path: &Path, version: Option<PipelineVersion>) -> Result<(String, PipelineVersion)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let version = match version {
        Some(version) => version,
        None => PipelineVersion::detect(&yaml::parse(&content)?),
    };
    Ok((content, version))
}

/// The compiled plan is supplied as a file; every compilation returns it
fn plan_file_compiler(path: &Path) -> Result<Arc<dyn PlanCompiler>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let plan: Plan = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse plan {}", path.display()))?;
    Ok(Arc::new(move |_: &str, _: PipelineVersion| -> replan::Result<Plan> {
        Ok(plan.clone())
    }))
}

async fn check_retry(cmd: &CheckCommand, cli: &Cli, config: &ReplanConfig) -> Result<()> {
    let stores = open_stores(cli, config).await?;
    let validator = RetryEligibilityValidator::new(stores.records, stores.nodes, config.retry_horizon());
    let info = validator.validate_retry(&cmd.pipeline, &cmd.execution).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("{}", format_retry_info(&info));
    }
    if !info.is_resumable {
        std::process::exit(1);
    }
    Ok(())
}

async fn prepare_retry(cmd: &RetryCommand, cli: &Cli, config: &ReplanConfig) -> Result<()> {
    let stores = open_stores(cli, config).await?;

    let validator = RetryEligibilityValidator::new(
        Arc::clone(&stores.records),
        Arc::clone(&stores.nodes),
        config.retry_horizon(),
    );
    let info = validator.validate_retry(&cmd.pipeline, &cmd.execution).await?;
    if !info.is_resumable {
        println!("{}", format_retry_info(&info));
        std::process::exit(1);
    }

    let (processed_yaml, version) = read_yaml(&cmd.yaml, cmd.pipeline_version)?;
    let orchestrator = ExecutionModeOrchestrator::new(plan_file_compiler(&cmd.plan)?, stores.records, stores.nodes);

    let mut request = ExecutionRequest::retry(
        processed_yaml,
        cmd.execution.clone(),
        RetryRequest {
            stage_identifiers: cmd.stages.clone(),
            failed_only: cmd.failed_only,
        },
    );
    request.pipeline_version = version;

    let prepared = orchestrator.prepare(&request).await?;
    if cmd.save {
        orchestrator.record(&cmd.pipeline, &prepared).await?;
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&prepared.plan)?);
    } else {
        println!("{}", format_prepared(&prepared));
        if cmd.save {
            println!("{} Execution recorded", INFO);
        }
    }
    Ok(())
}

async fn prepare_rollback(cmd: &RollbackCommand, cli: &Cli, config: &ReplanConfig) -> Result<()> {
    let stores = open_stores(cli, config).await?;
    let (mut processed_yaml, version) = read_yaml(&cmd.yaml, cmd.pipeline_version)?;

    let (mode, stage_fqns) = if cmd.stages.is_empty() {
        (ExecutionMode::PipelineRollback, Vec::new())
    } else {
        processed_yaml = yaml::retain_stages(&processed_yaml, &cmd.stages)?;
        let fqns = stores.nodes.fetch_stage_fqns(&cmd.execution, &cmd.stages).await?;
        if fqns.is_empty() {
            println!(
                "{} None of the stages {} ran in execution {}",
                CROSS,
                style(cmd.stages.join(", ")).bold(),
                cmd.execution
            );
            std::process::exit(1);
        }
        (ExecutionMode::PostExecutionRollback, fqns)
    };

    let orchestrator = ExecutionModeOrchestrator::new(plan_file_compiler(&cmd.plan)?, stores.records, stores.nodes);
    let mut request = ExecutionRequest::rollback(mode, processed_yaml, cmd.execution.clone(), stage_fqns);
    request.pipeline_version = version;
    request.preserve_node_ids = cmd.preserve.clone();

    let prepared = orchestrator.prepare(&request).await?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&prepared.plan)?);
    } else {
        println!("{}", format_prepared(&prepared));
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli, config: &ReplanConfig) -> Result<()> {
    let stores = open_stores(cli, config).await?;
    let validator = RetryEligibilityValidator::new(stores.records, stores.nodes, config.retry_horizon());
    let history = validator.retry_history(&cmd.root, &cmd.execution).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else {
        println!("{}", format_history(&history));
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn import_snapshot(cmd: &ImportCommand, config: &ReplanConfig) -> Result<()> {
    let snapshot = StoreSnapshot::from_file(&cmd.file)?;
    let path = config.resolved_database_path();
    let store = replan::persistence::SqliteStore::open(&path).await?;
    store.import(&snapshot).await?;

    println!(
        "{} Imported {} node execution(s) into {}",
        CHECK,
        style(snapshot.node_executions.len()).cyan(),
        style(path.display()).dim()
    );
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn import_snapshot(_cmd: &ImportCommand, _config: &ReplanConfig) -> Result<()> {
    anyhow::bail!("Built without SQLite support")
}
