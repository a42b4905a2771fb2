//! Processed pipeline YAML access
//!
//! Processed YAML is the pipeline definition after input and template
//! resolution, with a `__uuid` marker on every stage. Two layouts exist:
//!
//! ```yaml
//! # V0
//! pipeline:
//!   stages:
//!     - stage: { identifier: s1, __uuid: a }
//!     - parallel:
//!         - stage: { identifier: s2, __uuid: b }
//!
//! # V1
//! version: 1
//! stages:
//!   - { id: s1, __uuid: a }
//!   - type: parallel
//!     spec:
//!       stages:
//!         - { id: s2, __uuid: b }
//! ```

pub mod retry;
pub mod rollback;

use crate::error::ReplanError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;

pub use retry::{retry_processed_yaml, RetryYamlOutcome};
pub use rollback::reverse_and_filter_stages;

/// Field correlating a stage across executions
pub const UUID_FIELD: &str = "__uuid";

/// Layout version of a pipeline document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PipelineVersion {
    #[default]
    V0,
    V1,
}

impl PipelineVersion {
    /// Detect the layout from a parsed document
    pub fn detect(document: &Value) -> Self {
        if document.get("pipeline").is_some() {
            return PipelineVersion::V0;
        }
        let declares_v1 = match document.get("version") {
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            Some(Value::String(s)) => s == "1",
            _ => false,
        };
        if declares_v1 || document.get("stages").is_some() {
            PipelineVersion::V1
        } else {
            PipelineVersion::V0
        }
    }

    fn identifier_key(&self) -> &'static str {
        match self {
            PipelineVersion::V0 => "identifier",
            PipelineVersion::V1 => "id",
        }
    }
}

impl std::str::FromStr for PipelineVersion {
    type Err = ReplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "v0" => Ok(PipelineVersion::V0),
            "1" | "v1" => Ok(PipelineVersion::V1),
            other => Err(ReplanError::invalid_request(format!(
                "Unknown pipeline version: {}",
                other
            ))),
        }
    }
}

/// Parse a processed YAML document
pub fn parse(yaml: &str) -> Result<Value, ReplanError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Top-level stage list
pub fn stages(document: &Value, version: PipelineVersion) -> Option<&Vec<Value>> {
    match version {
        PipelineVersion::V0 => document.get("pipeline")?.get("stages")?.as_sequence(),
        PipelineVersion::V1 => document.get("stages")?.as_sequence(),
    }
}

pub fn stages_mut(document: &mut Value, version: PipelineVersion) -> Option<&mut Vec<Value>> {
    match version {
        PipelineVersion::V0 => document
            .get_mut("pipeline")?
            .get_mut("stages")?
            .as_sequence_mut(),
        PipelineVersion::V1 => document.get_mut("stages")?.as_sequence_mut(),
    }
}

/// Members of a parallel group, `None` for a single stage element
pub fn parallel_members(element: &Value, version: PipelineVersion) -> Option<&Vec<Value>> {
    match version {
        PipelineVersion::V0 => element.get("parallel")?.as_sequence(),
        PipelineVersion::V1 => {
            if element.get("type").and_then(Value::as_str) != Some("parallel") {
                return None;
            }
            element.get("spec")?.get("stages")?.as_sequence()
        }
    }
}

pub fn parallel_members_mut(element: &mut Value, version: PipelineVersion) -> Option<&mut Vec<Value>> {
    match version {
        PipelineVersion::V0 => element.get_mut("parallel")?.as_sequence_mut(),
        PipelineVersion::V1 => {
            if element.get("type").and_then(Value::as_str) != Some("parallel") {
                return None;
            }
            element.get_mut("spec")?.get_mut("stages")?.as_sequence_mut()
        }
    }
}

/// The stage object of a single stage element
fn stage_body(element: &Value, version: PipelineVersion) -> Option<&Value> {
    match version {
        PipelineVersion::V0 => element.get("stage"),
        PipelineVersion::V1 => Some(element),
    }
}

/// Identifier of a single stage element
pub fn stage_identifier(element: &Value, version: PipelineVersion) -> Option<&str> {
    let body = stage_body(element, version)?;
    body.get(version.identifier_key())
        .or_else(|| body.get("identifier"))
        .and_then(Value::as_str)
}

/// Copy the `__uuid` marker of a stage element, both on the element itself
/// and on its wrapped stage object.
pub fn copy_stage_uuid(from: &Value, to: &mut Value, version: PipelineVersion) {
    copy_uuid_field(from, to);
    if version == PipelineVersion::V0 {
        if let (Some(from_body), Some(to_body)) = (from.get("stage"), to.get_mut("stage")) {
            copy_uuid_field(from_body, to_body);
        }
    }
}

pub(crate) fn copy_uuid_field(from: &Value, to: &mut Value) {
    let Some(uuid) = from.get(UUID_FIELD) else {
        return;
    };
    if let Some(mapping) = to.as_mapping_mut() {
        mapping.insert(Value::String(UUID_FIELD.to_string()), uuid.clone());
    }
}

/// Stage identifiers in document order, parallel members included
pub fn stage_identifiers_of(document: &Value, version: PipelineVersion) -> Result<Vec<String>, ReplanError> {
    let list = stages(document, version)
        .ok_or_else(|| ReplanError::invalid_request("Pipeline YAML has no stage list"))?;

    let mut identifiers = Vec::new();
    for element in list {
        match parallel_members(element, version) {
            Some(members) => {
                for member in members {
                    identifiers.push(required_identifier(member, version)?);
                }
            }
            None => identifiers.push(required_identifier(element, version)?),
        }
    }
    Ok(identifiers)
}

/// Parse a document and list its stage identifiers
pub fn stage_identifiers(yaml: &str) -> Result<Vec<String>, ReplanError> {
    let document = parse(yaml)?;
    let version = PipelineVersion::detect(&document);
    stage_identifiers_of(&document, version)
}

fn required_identifier(element: &Value, version: PipelineVersion) -> Result<String, ReplanError> {
    stage_identifier(element, version)
        .map(str::to_string)
        .ok_or_else(|| ReplanError::invalid_request("Stage without identifier in pipeline YAML"))
}

/// Keep only the listed stages. Parallel groups keep their selected members
/// and disappear when none is selected.
pub fn retain_stages(yaml: &str, identifiers: &[String]) -> Result<String, ReplanError> {
    let mut document = parse(yaml)?;
    let version = PipelineVersion::detect(&document);
    let selected: HashSet<&str> = identifiers.iter().map(String::as_str).collect();

    let list = stages_mut(&mut document, version)
        .ok_or_else(|| ReplanError::invalid_request("Pipeline YAML has no stage list"))?;

    list.retain_mut(|element| match parallel_members_mut(element, version) {
        Some(members) => {
            members.retain(|member| {
                stage_identifier(member, version).is_some_and(|id| selected.contains(id))
            });
            !members.is_empty()
        }
        None => stage_identifier(element, version).is_some_and(|id| selected.contains(id)),
    });

    Ok(serde_yaml::to_string(&document)?)
}
