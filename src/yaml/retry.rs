//! Rewrite processed YAML for a retry
//!
//! Stages before the retry point are copied verbatim from the previous
//! execution so their results can be reused. From the retry point on, stages
//! keep their freshly rendered content and only inherit the previous `__uuid`
//! so the runtime can correlate them.

use super::{copy_stage_uuid, copy_uuid_field, parallel_members, parallel_members_mut, stage_identifier, stages, stages_mut, PipelineVersion};
use serde_yaml::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Rewritten YAML plus the stages that were copied forward
#[derive(Debug, Clone, PartialEq)]
pub struct RetryYamlOutcome {
    pub yaml: String,
    pub skipped_stage_identifiers: Vec<String>,
}

impl RetryYamlOutcome {
    fn unchanged(current: &str) -> Self {
        Self {
            yaml: current.to_string(),
            skipped_stage_identifiers: Vec::new(),
        }
    }
}

/// Walk previous and current stage lists in lock-step and merge them.
///
/// When either document cannot be parsed, or the two stage lists do not have
/// the same shape, the current YAML is returned untouched with no skipped
/// stages.
pub fn retry_processed_yaml(
    previous: &str,
    current: &str,
    retry_stages: &[String],
    version: PipelineVersion,
) -> RetryYamlOutcome {
    let previous_doc: Value = match serde_yaml::from_str(previous) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Previous processed YAML is not parseable, skipping retry rewrite: {}", e);
            return RetryYamlOutcome::unchanged(current);
        }
    };
    let mut current_doc: Value = match serde_yaml::from_str(current) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Current processed YAML is not parseable, skipping retry rewrite: {}", e);
            return RetryYamlOutcome::unchanged(current);
        }
    };

    let Some(skipped) = merge_stages(&previous_doc, &mut current_doc, retry_stages, version) else {
        warn!("Stage lists of previous and current YAML differ in shape, skipping retry rewrite");
        return RetryYamlOutcome::unchanged(current);
    };

    match serde_yaml::to_string(&current_doc) {
        Ok(yaml) => {
            debug!("Retry YAML rewrite skipped {} stage(s)", skipped.len());
            RetryYamlOutcome {
                yaml,
                skipped_stage_identifiers: skipped,
            }
        }
        Err(e) => {
            warn!("Failed to serialize retried YAML: {}", e);
            RetryYamlOutcome::unchanged(current)
        }
    }
}

/// Returns the skipped identifiers, or `None` on a shape mismatch
fn merge_stages(
    previous_doc: &Value,
    current_doc: &mut Value,
    retry_stages: &[String],
    version: PipelineVersion,
) -> Option<Vec<String>> {
    let retry_set: HashSet<&str> = retry_stages.iter().map(String::as_str).collect();
    let previous_stages = stages(previous_doc, version)?;
    let current_stages = stages_mut(current_doc, version)?;

    let mut skipped = Vec::new();
    let mut past_retry_point = false;

    for (index, previous_element) in previous_stages.iter().enumerate() {
        let Some(current_element) = current_stages.get_mut(index) else {
            break;
        };

        if let Some(previous_members) = parallel_members(previous_element, version) {
            let touches_retry = previous_members.iter().any(|member| {
                stage_identifier(member, version).is_some_and(|id| retry_set.contains(id))
            });

            if !past_retry_point && !touches_retry {
                *current_element = previous_element.clone();
                for member in previous_members {
                    skipped.push(stage_identifier(member, version)?.to_string());
                }
                continue;
            }

            copy_uuid_field(previous_element, current_element);
            let current_members = parallel_members_mut(current_element, version)?;
            for (member_index, previous_member) in previous_members.iter().enumerate() {
                let Some(current_member) = current_members.get_mut(member_index) else {
                    break;
                };
                let identifier = stage_identifier(previous_member, version)?;
                if past_retry_point || retry_set.contains(identifier) {
                    copy_stage_uuid(previous_member, current_member, version);
                } else {
                    *current_member = previous_member.clone();
                    skipped.push(identifier.to_string());
                }
            }
            break;
        }

        if parallel_members(current_element, version).is_some() {
            return None;
        }

        let identifier = stage_identifier(previous_element, version)?;
        if past_retry_point {
            copy_stage_uuid(previous_element, current_element, version);
            break;
        }

        if retry_set.contains(identifier) {
            copy_stage_uuid(previous_element, current_element, version);
            past_retry_point = true;
        } else {
            *current_element = previous_element.clone();
            skipped.push(identifier.to_string());
        }
    }

    Some(skipped)
}
