//! CLI output formatting

use crate::core::{ExecutionStatus, Plan, RetryHistory, RetryInfo, RetryStageInfo};
use crate::execution::PreparedExecution;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    let label = serde_json::to_value(status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", status));
    match status {
        ExecutionStatus::Succeeded => style(label).green().to_string(),
        ExecutionStatus::Failed
        | ExecutionStatus::Aborted
        | ExecutionStatus::Expired
        | ExecutionStatus::ApprovalRejected => style(label).red().to_string(),
        ExecutionStatus::Running | ExecutionStatus::Queued | ExecutionStatus::Paused => {
            style(label).yellow().to_string()
        }
        ExecutionStatus::NotStarted | ExecutionStatus::Skipped | ExecutionStatus::IgnoreFailed => {
            style(label).dim().to_string()
        }
    }
}

fn format_stage(info: &RetryStageInfo) -> String {
    let name = if info.name.is_empty() { &info.identifier } else { &info.name };
    format!("{} ({})", style(name).bold(), format_status(info.status))
}

/// Format retry eligibility for display
pub fn format_retry_info(info: &RetryInfo) -> String {
    if !info.is_resumable {
        return format!(
            "{} Execution cannot be retried: {}",
            CROSS,
            style(info.error_message.as_deref().unwrap_or("unknown reason")).red()
        );
    }

    let mut lines = vec![format!(
        "{} Execution can be retried from {} point(s):",
        CHECK,
        style(info.groups.len()).cyan()
    )];
    for (index, group) in info.groups.iter().enumerate() {
        let stages: Vec<String> = group.info.iter().map(format_stage).collect();
        lines.push(format!("  {}. {}", index + 1, stages.join(", ")));
    }
    lines.join("\n")
}

/// Format a plan's node breakdown
pub fn format_plan(plan: &Plan) -> String {
    format!(
        "{} node(s): {} live, {} identity",
        style(plan.len()).cyan(),
        style(plan.live_nodes().count()).green(),
        style(plan.identity_nodes().count()).dim()
    )
}

/// Format a prepared execution for display
pub fn format_prepared(prepared: &PreparedExecution) -> String {
    let mut lines = vec![
        format!(
            "{} Prepared {} execution {}",
            ROCKET,
            style(prepared.mode).bold(),
            style(prepared.execution_id.get(..8).unwrap_or(&prepared.execution_id)).dim()
        ),
        format!("  Plan: {}", format_plan(&prepared.plan)),
    ];
    if let Some(metadata) = &prepared.retry_stages_metadata {
        lines.push(format!(
            "  Retrying: {}",
            style(metadata.retry_stages_identifier.join(", ")).cyan()
        ));
        if !metadata.skip_stages_identifier.is_empty() {
            lines.push(format!(
                "  Reused: {}",
                style(metadata.skip_stages_identifier.join(", ")).dim()
            ));
        }
    }
    lines.join("\n")
}

/// Format a retry lineage for display
pub fn format_history(history: &RetryHistory) -> String {
    if let Some(message) = &history.error_message {
        return format!("{} {}", WARN, message);
    }

    let mut lines = vec![format!(
        "{} Retry history ({} executions):",
        INFO,
        history.execution_infos.len()
    )];
    for info in &history.execution_infos {
        let marker = if history.latest_execution_id.as_deref() == Some(info.plan_execution_id.as_str()) {
            style("latest").green().to_string()
        } else {
            String::new()
        };
        let started = info
            .start_ts
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "  {} {} {} {}",
            style(&info.plan_execution_id).cyan(),
            format_status(info.status),
            style(started).dim(),
            marker
        ));
    }
    lines.join("\n")
}
