use chrono::{DateTime, Utc};
use scene_graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw key of a feature's unique, immutable ID.
pub const FEATURE_ID_PARAM: &str = "featureID";

/// The ordered list of feature records plus the replay cursor.
#[derive(Debug, Clone, Default)]
pub struct FeatureTree {
    /// Ordered list of features. Index 0 replays first.
    pub features: Vec<FeatureRecord>,
    /// Replay stops after the feature with this ID. Set by the caller, never
    /// cleared by a replay pass.
    pub current_step: Option<String>,
    /// Monotonic counter behind generated feature IDs.
    pub id_counter: u64,
}

/// A single step of the parametric history.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub feature_type: String,
    /// Raw UI values; always carries `featureID`.
    pub input_params: Map<String, Value>,
    /// Feature-owned state carried across runs.
    pub persistent_data: Value,
    /// Logical clock value of the last successful run.
    pub timestamp: u64,
    pub dirty: bool,
    /// Serialized `input_params` as of the last successful run.
    pub last_run_input_params: Option<String>,
    pub last_run: Option<LastRun>,
    /// Artifacts produced by the last successful run, replayed while clean.
    pub effects: Effects,
}

impl FeatureRecord {
    pub fn new(feature_type: impl Into<String>, input_params: Map<String, Value>) -> Self {
        Self {
            feature_type: feature_type.into(),
            input_params,
            persistent_data: Value::Object(Map::new()),
            timestamp: 0,
            dirty: true,
            last_run_input_params: None,
            last_run: None,
            effects: Effects::default(),
        }
    }

    pub fn feature_id(&self) -> Option<&str> {
        self.input_params.get(FEATURE_ID_PARAM).and_then(Value::as_str)
    }

    /// Canonical serialization of `input_params` used for change detection.
    pub fn snapshot(&self) -> String {
        // Map<String, Value> is key-ordered, so equal params serialize equally.
        serde_json::to_string(&self.input_params).unwrap_or_default()
    }

    pub fn params_changed(&self) -> bool {
        self.last_run_input_params.as_deref() != Some(self.snapshot().as_str())
    }
}

/// Scene changes a feature run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// Diagnostics of a feature's most recent run attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub ok: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
}

impl LastRun {
    pub fn succeeded(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            ok: true,
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).num_milliseconds(),
            error: None,
        }
    }

    pub fn failed(started_at: DateTime<Utc>, ended_at: DateTime<Utc>, error: RunFailure) -> Self {
        Self {
            ok: false,
            error: Some(error),
            ..Self::succeeded(started_at, ended_at)
        }
    }
}

/// Why a feature did not produce effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The feature type is not registered. Not fatal to the pass.
    MissingFeature,
    /// `run` returned an error. Aborts the pass.
    RunFailed,
    /// `run` returned artifact handles that are not live scene nodes. Aborts
    /// the pass.
    MalformedResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors from the history editing API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("feature not found: {id}")]
    FeatureNotFound { id: String },

    #[error("missing feature type: {feature_type}")]
    MissingFeature { feature_type: String },

    #[error("parameter {key} cannot be changed")]
    ImmutableParam { key: String },
}
