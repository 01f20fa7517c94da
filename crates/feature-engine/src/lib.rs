//! Parametric feature history.
//!
//! [`PartHistory`] owns the ordered feature list, the scene it replays into,
//! the document's expression buffer and the assembly constraint list. A
//! [`PartHistory::run_history`] pass replays dirty features, reapplies the
//! effects of clean ones, then runs the constraint solver.

pub mod feature;
pub mod rebuild;
pub mod sanitize;
pub mod tree;
pub mod types;

use std::sync::Arc;

use assembly_solver::{
    AssemblyConstraintHistory, ConstraintRegistry, SolveOptions, SolveReport, SolveStatus,
};
use expression::{ArithmeticEvaluator, Evaluate, ExpressionContext};
use history_types::Registered;
use scene_graph::Scene;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

pub use feature::{
    Feature, FeatureClass, FeatureContext, FeatureError, FeatureRegistry, RunResult,
};
pub use rebuild::HistoryRun;
pub use sanitize::{
    sanitize, BooleanKind, BooleanOperation, ParamValue, SanitizeEnv, SanitizedParams,
};
pub use types::*;

use crate::rebuild::ReplayEnv;

/// A part document: feature history, scene, expressions and constraints.
pub struct PartHistory {
    tree: FeatureTree,
    /// The scene the history replays into.
    pub scene: Scene,
    pub constraints: AssemblyConstraintHistory,
    registry: Arc<FeatureRegistry>,
    evaluator: Arc<dyn Evaluate>,
    pub expressions: ExpressionContext,
    /// Saved annotation views. Carried through save/load untouched.
    pub pmi_views: Vec<Value>,
    pub metadata: Map<String, Value>,
    /// Options for the constraint pass at the end of `run_history`.
    pub solve_options: SolveOptions,
    clock: u64,
}

impl PartHistory {
    pub fn new(registry: Arc<FeatureRegistry>, constraints: Arc<ConstraintRegistry>) -> Self {
        Self {
            tree: FeatureTree::new(),
            scene: Scene::new(),
            constraints: AssemblyConstraintHistory::new(constraints),
            registry,
            evaluator: Arc::new(ArithmeticEvaluator::new()),
            expressions: ExpressionContext::default(),
            pmi_views: Vec::new(),
            metadata: Map::new(),
            solve_options: SolveOptions::default(),
            clock: 0,
        }
    }

    /// Replace the default arithmetic evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluate>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &FeatureTree {
        &self.tree
    }

    pub fn features(&self) -> &[FeatureRecord] {
        &self.tree.features
    }

    pub fn feature(&self, id: &str) -> Option<&FeatureRecord> {
        self.tree.find_feature(id)
    }

    pub fn feature_index(&self, id: &str) -> Option<usize> {
        self.tree.feature_index(id)
    }

    /// Append a feature of `feature_type` with its schema defaults. Returns the
    /// generated `featureID`.
    pub fn new_feature(&mut self, feature_type: &str) -> Result<String, EngineError> {
        let class = self
            .registry
            .resolve(feature_type)
            .ok_or_else(|| EngineError::MissingFeature {
                feature_type: feature_type.to_string(),
            })?;
        let defaults = class.input_params_schema().defaults();
        let id = self
            .tree
            .add_feature(class.type_name(), class.short_name(), defaults);
        info!(feature_id = %id, feature_type = class.type_name(), "feature added");
        Ok(id)
    }

    /// Remove a feature and dispose every artifact it produced.
    pub fn remove_feature(&mut self, id: &str) -> Result<FeatureRecord, EngineError> {
        let record = self.tree.remove_feature(id)?;
        let mut disposed = 0;
        for artifact in record.effects.added.iter().copied().chain(self.scene.owned_by(id)) {
            disposed += self.scene.dispose(artifact);
        }
        info!(feature_id = id, disposed, "feature removed");
        Ok(record)
    }

    /// Set one raw input parameter. `featureID` is immutable.
    pub fn set_input_param(
        &mut self,
        id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        if key == FEATURE_ID_PARAM {
            return Err(EngineError::ImmutableParam { key: key.to_string() });
        }
        let record = self
            .tree
            .find_feature_mut(id)
            .ok_or_else(|| EngineError::FeatureNotFound { id: id.to_string() })?;
        record.input_params.insert(key.to_string(), value);
        Ok(())
    }

    pub fn mark_dirty(&mut self, id: &str) -> Result<(), EngineError> {
        self.tree.mark_dirty(id)
    }

    /// Stop subsequent replays after `id`; `None` replays everything.
    pub fn set_current_step(&mut self, id: Option<&str>) -> Result<(), EngineError> {
        if let Some(id) = id {
            if self.tree.feature_index(id).is_none() {
                return Err(EngineError::FeatureNotFound { id: id.to_string() });
            }
        }
        self.tree.current_step = id.map(str::to_string);
        Ok(())
    }

    pub fn current_step(&self) -> Option<&str> {
        self.tree.current_step.as_deref()
    }

    /// Replace the feature list, as when loading a document. Every record is
    /// marked dirty so the next replay rebuilds from scratch. Records without
    /// a `featureID`, or with one already taken, receive a fresh one.
    pub fn replace_features(&mut self, features: Vec<FeatureRecord>, id_counter: u64) {
        self.tree = FeatureTree {
            features: Vec::with_capacity(features.len()),
            current_step: None,
            id_counter,
        };
        for mut record in features {
            let needs_id = match record.feature_id() {
                None | Some("") => true,
                Some(id) => self.tree.feature_index(id).is_some(),
            };
            if needs_id {
                let prefix = self
                    .registry
                    .resolve(&record.feature_type)
                    .map(|c| c.short_name().to_string())
                    .unwrap_or_else(|| "F".to_string());
                let id = self.tree.next_id(&prefix);
                warn!(feature_id = %id, "feature record had no usable id");
                record
                    .input_params
                    .insert(FEATURE_ID_PARAM.into(), Value::String(id));
            }
            record.dirty = true;
            self.tree.features.push(record);
        }
        self.clock = self.tree.latest_timestamp();
    }

    /// Drop every feature, constraint, expression and scene node.
    pub fn reset(&mut self) {
        self.tree = FeatureTree::new();
        self.scene = Scene::new();
        self.constraints.clear();
        self.expressions = ExpressionContext::default();
        self.pmi_views.clear();
        self.metadata.clear();
        self.clock = 0;
    }

    /// Replay the history into the scene, then run the constraint pass.
    ///
    /// Missing feature types are recorded on the record and skipped. A feature
    /// whose run fails aborts the pass before any later feature and before the
    /// constraint pass.
    #[instrument(skip_all, fields(features = self.tree.features.len()))]
    pub fn run_history(&mut self) -> HistoryRun {
        let env = ReplayEnv {
            registry: &self.registry,
            evaluator: self.evaluator.as_ref(),
            expressions: &self.expressions,
        };
        let mut run = rebuild::replay(&mut self.tree, &mut self.scene, &env, &mut self.clock);
        if let Some(feature_id) = &run.aborted_at {
            warn!(feature_id = %feature_id, "history replay aborted");
            return run;
        }

        let report = self.solve_assembly();
        let failed = report
            .results
            .iter()
            .filter(|r| r.status == SolveStatus::Error)
            .count();
        if failed > 0 {
            warn!(failed, "assembly constraints reported errors");
        }
        info!(
            executed = run.executed.len(),
            reused = run.reused.len(),
            missing = run.missing.len(),
            "history replayed"
        );
        run.solve = Some(report);
        run
    }

    /// Run the assembly constraint pass against the current scene.
    pub fn solve_assembly(&mut self) -> SolveReport {
        self.constraints
            .run_all(&mut self.scene, &mut self.tree, &self.solve_options)
    }
}
