//! Rewrite processed YAML for rollback modes

use super::{stages_mut, PipelineVersion};
use crate::error::ReplanError;
use serde_yaml::Value;

/// Reverse the top-level stage list so stages are undone in the opposite
/// order they ran. Parallel groups move as a unit.
///
/// The input was produced by the engine moments earlier, so anything that
/// does not parse is reported as an internal error.
pub fn reverse_and_filter_stages(processed_yaml: &str) -> Result<String, ReplanError> {
    let mut document: Value = serde_yaml::from_str(processed_yaml).map_err(|e| {
        ReplanError::internal(format!("Processed YAML for rollback is not parseable: {}", e))
    })?;
    let version = PipelineVersion::detect(&document);

    let stages = stages_mut(&mut document, version)
        .ok_or_else(|| ReplanError::internal("Processed YAML for rollback has no stage list"))?;
    stages.reverse();

    serde_yaml::to_string(&document).map_err(|e| {
        ReplanError::internal(format!("Failed to serialize rollback YAML: {}", e))
    })
}
