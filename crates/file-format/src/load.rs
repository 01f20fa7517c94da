use assembly_solver::ConstraintRecord;
use feature_engine::{FeatureRecord, PartHistory};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::errors::LoadError;
use crate::save::FORMAT_VERSION;

/// The top-level file structure for deserialization. Every field is
/// optional so older and hand-written documents still load.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectFileRaw {
    pub version: Option<u32>,
    pub features: Vec<FeatureEntryRaw>,
    pub id_counter: u64,
    pub expressions: String,
    pub pmi_views: Vec<Value>,
    pub metadata: Map<String, Value>,
    pub assembly_constraints: Vec<ConstraintRecord>,
    pub assembly_constraint_id_counter: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEntryRaw {
    #[serde(rename = "type")]
    pub feature_type: String,
    #[serde(default)]
    pub input_params: Map<String, Value>,
    #[serde(default = "empty_object")]
    pub persistent_data: Value,
    #[serde(default)]
    pub timestamp: u64,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl From<FeatureEntryRaw> for FeatureRecord {
    fn from(raw: FeatureEntryRaw) -> Self {
        let mut record = FeatureRecord::new(raw.feature_type, raw.input_params);
        record.persistent_data = match raw.persistent_data {
            Value::Null => empty_object(),
            data => data,
        };
        record.timestamp = raw.timestamp;
        record
    }
}

/// Parse a project JSON string without touching any document.
pub fn parse_project(json: &str) -> Result<ProjectFileRaw, LoadError> {
    let raw: ProjectFileRaw =
        serde_json::from_str(json).map_err(|e| LoadError::ParseError(e.to_string()))?;

    if let Some(version) = raw.version {
        if version > FORMAT_VERSION {
            return Err(LoadError::FutureVersion {
                file_version: version,
                supported_version: FORMAT_VERSION,
            });
        }
    }
    Ok(raw)
}

/// Load a project JSON string into `part`, replacing its whole content.
///
/// The document is untouched if the file fails to parse. Every loaded feature
/// is dirty, so the next `run_history` rebuilds the scene.
pub fn load_project(json: &str, part: &mut PartHistory) -> Result<(), LoadError> {
    let raw = parse_project(json)?;

    part.reset();
    let features = raw.features.into_iter().map(FeatureRecord::from).collect();
    part.replace_features(features, raw.id_counter);
    part.constraints
        .replace_all(raw.assembly_constraints, raw.assembly_constraint_id_counter);
    part.expressions.set_buffer(raw.expressions);
    part.pmi_views = raw.pmi_views;
    part.metadata = raw.metadata;

    info!(
        features = part.features().len(),
        constraints = part.constraints.len(),
        "project loaded"
    );
    Ok(())
}
