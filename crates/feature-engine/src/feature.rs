use expression::{Evaluate, ExpressionContext};
use history_types::{ParamSchema, Registered, Registry};
use scene_graph::{NodeId, Scene};
use serde_json::Value;

use crate::sanitize::SanitizedParams;
use crate::types::FeatureRecord;

/// What a feature run contributes to the scene.
///
/// `added` nodes must be live in the scene arena (typically created detached
/// with [`Scene::create`]); the replay engine attaches them. `removed` nodes
/// are detached if still attached, and ignored otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(added: Vec<NodeId>) -> Self {
        Self {
            added,
            removed: Vec::new(),
        }
    }

    pub fn with_removed(mut self, removed: Vec<NodeId>) -> Self {
        self.removed = removed;
        self
    }
}

/// Errors a feature raises from `run`. Any of them aborts the replay pass.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeatureError {
    #[error("missing input: {key}")]
    MissingInput { key: String },

    #[error("invalid input {key}: {reason}")]
    InvalidInput { key: String, reason: String },

    #[error("geometry kernel error: {0}")]
    Kernel(String),

    #[error("{0}")]
    Other(String),
}

/// A live feature instance, created fresh for every run.
pub trait Feature {
    fn run(&mut self, ctx: &mut FeatureContext<'_>) -> Result<RunResult, FeatureError>;
}

/// A feature type: its parameter schema and a factory for instances.
pub trait FeatureClass: Registered {
    fn input_params_schema(&self) -> ParamSchema;

    fn create(&self) -> Box<dyn Feature>;
}

pub type FeatureRegistry = Registry<dyn FeatureClass>;

/// The history as seen from inside one feature's `run`.
pub struct FeatureContext<'a> {
    pub feature_id: &'a str,
    pub params: &'a SanitizedParams,
    /// The record's persistent data. Written back only if the run succeeds.
    pub persistent_data: &'a mut Value,
    pub scene: &'a mut Scene,
    pub expressions: &'a ExpressionContext,
    pub(crate) evaluator: &'a dyn Evaluate,
    /// Records that replay before this one.
    pub previous: &'a [FeatureRecord],
}

impl FeatureContext<'_> {
    /// Evaluate an expression against the document's buffer.
    pub fn evaluate(&self, equation: &str) -> Option<f64> {
        self.expressions.evaluate(self.evaluator, equation)
    }

    pub fn previous_feature(&self, id: &str) -> Option<&FeatureRecord> {
        self.previous.iter().find(|f| f.feature_id() == Some(id))
    }

    /// Attached artifacts produced by an earlier feature.
    pub fn artifacts_of(&self, feature_id: &str) -> Vec<NodeId> {
        self.scene.owned_by(feature_id)
    }
}
