use assembly_solver::ConstraintRecord;
use chrono::Utc;
use feature_engine::{FeatureRecord, PartHistory};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::errors::SaveError;
use crate::metadata::stamp_saved;

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// The top-level file structure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile<'a> {
    pub version: u32,
    pub features: Vec<FeatureEntry<'a>>,
    pub id_counter: u64,
    /// The expression buffer, verbatim.
    pub expressions: &'a str,
    pub pmi_views: &'a [Value],
    pub metadata: &'a Map<String, Value>,
    pub assembly_constraints: &'a [ConstraintRecord],
    pub assembly_constraint_id_counter: u64,
}

/// The persisted part of a feature record. Run state is rebuilt on load.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEntry<'a> {
    #[serde(rename = "type")]
    pub feature_type: &'a str,
    pub input_params: &'a Map<String, Value>,
    pub persistent_data: &'a Value,
    pub timestamp: u64,
}

impl<'a> From<&'a FeatureRecord> for FeatureEntry<'a> {
    fn from(record: &'a FeatureRecord) -> Self {
        Self {
            feature_type: &record.feature_type,
            input_params: &record.input_params,
            persistent_data: &record.persistent_data,
            timestamp: record.timestamp,
        }
    }
}

/// Serialize a project to a pretty-printed JSON string.
///
/// Stamps `metadata.modified` (and `metadata.created` on first save) on the
/// document before writing it.
pub fn save_project(part: &mut PartHistory) -> Result<String, SaveError> {
    stamp_saved(&mut part.metadata, Utc::now());

    let file = ProjectFile {
        version: FORMAT_VERSION,
        features: part.features().iter().map(FeatureEntry::from).collect(),
        id_counter: part.tree().id_counter,
        expressions: part.expressions.buffer(),
        pmi_views: &part.pmi_views,
        metadata: &part.metadata,
        assembly_constraints: part.constraints.constraints(),
        assembly_constraint_id_counter: part.constraints.id_counter(),
    };
    let json =
        serde_json::to_string_pretty(&file).map_err(|e| SaveError::Serialize(e.to_string()))?;
    info!(
        features = file.features.len(),
        constraints = file.assembly_constraints.len(),
        bytes = json.len(),
        "project saved"
    );
    Ok(json)
}
