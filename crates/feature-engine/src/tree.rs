use assembly_solver::ComponentFeatures;
use history_types::{is_truthy, TransformParams, FIXED_PARAM, TRANSFORM_PARAM};
use serde_json::{Map, Value};

use crate::types::{EngineError, FeatureRecord, FeatureTree, FEATURE_ID_PARAM};

impl FeatureTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record with a freshly generated `featureID`. Returns the ID.
    pub fn add_feature(
        &mut self,
        feature_type: &str,
        short_name: &str,
        mut input_params: Map<String, Value>,
    ) -> String {
        let id = self.next_id(short_name);
        input_params.insert(FEATURE_ID_PARAM.into(), Value::String(id.clone()));
        self.features.push(FeatureRecord::new(feature_type, input_params));
        id
    }

    /// `"{prefix}{counter}"`, skipping any ID already in use.
    pub fn next_id(&mut self, prefix: &str) -> String {
        loop {
            self.id_counter += 1;
            let id = format!("{prefix}{}", self.id_counter);
            if self.feature_index(&id).is_none() {
                return id;
            }
        }
    }

    /// Remove a feature by ID. The feature that takes its place is marked dirty.
    pub fn remove_feature(&mut self, id: &str) -> Result<FeatureRecord, EngineError> {
        let pos = self
            .feature_index(id)
            .ok_or_else(|| EngineError::FeatureNotFound { id: id.to_string() })?;
        let record = self.features.remove(pos);
        if let Some(next) = self.features.get_mut(pos) {
            next.dirty = true;
        }
        if self.current_step.as_deref() == Some(id) {
            self.current_step = None;
        }
        Ok(record)
    }

    pub fn find_feature(&self, id: &str) -> Option<&FeatureRecord> {
        self.features.iter().find(|f| f.feature_id() == Some(id))
    }

    pub fn find_feature_mut(&mut self, id: &str) -> Option<&mut FeatureRecord> {
        self.features.iter_mut().find(|f| f.feature_id() == Some(id))
    }

    pub fn feature_index(&self, id: &str) -> Option<usize> {
        self.features.iter().position(|f| f.feature_id() == Some(id))
    }

    pub fn mark_dirty(&mut self, id: &str) -> Result<(), EngineError> {
        let record = self
            .find_feature_mut(id)
            .ok_or_else(|| EngineError::FeatureNotFound { id: id.to_string() })?;
        record.dirty = true;
        Ok(())
    }

    /// Largest timestamp in the list.
    pub fn latest_timestamp(&self) -> u64 {
        self.features.iter().map(|f| f.timestamp).max().unwrap_or(0)
    }
}

impl ComponentFeatures for FeatureTree {
    fn is_fixed(&self, feature_id: &str) -> bool {
        self.find_feature(feature_id)
            .and_then(|f| f.input_params.get(FIXED_PARAM))
            .is_some_and(is_truthy)
    }

    fn sync_transform(&mut self, feature_id: &str, transform: &TransformParams) -> bool {
        let Some(record) = self.find_feature_mut(feature_id) else {
            return false;
        };
        record
            .input_params
            .insert(TRANSFORM_PARAM.into(), transform.to_value());
        true
    }
}
