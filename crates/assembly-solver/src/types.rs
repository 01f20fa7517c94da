use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Raw key of a constraint's unique ID.
pub const CONSTRAINT_ID_PARAM: &str = "constraintID";
/// Raw key of the apply-immediately flag.
pub const APPLY_IMMEDIATELY_PARAM: &str = "applyImmediately";
/// Result message of a record held back because `applyImmediately` is off.
pub const HELD_MESSAGE: &str = "applyImmediately is off";

/// Outcome category of a single constraint solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveStatus {
    Satisfied,
    Adjusted,
    #[default]
    Pending,
    Error,
}

/// Last-known solver status, persisted on the record for display.
///
/// Loading never fails on this block: a field of the wrong shape falls back
/// to its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintStatusData {
    #[serde(default, deserialize_with = "lenient")]
    pub status: SolveStatus,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub satisfied: bool,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub last_iteration: Option<usize>,
}

/// Deserialize `T`, or its default when the value has another shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// One entry of the ordered constraint list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintRecord {
    #[serde(rename = "type")]
    pub constraint_type: String,
    #[serde(default)]
    pub input_params: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub persistent_data: ConstraintStatusData,
    /// Whether the constraint's panel is expanded. Not used for solving.
    #[serde(default)]
    pub open: bool,
}

impl ConstraintRecord {
    pub fn new(constraint_type: impl Into<String>, input_params: Map<String, Value>) -> Self {
        Self {
            constraint_type: constraint_type.into(),
            input_params,
            persistent_data: ConstraintStatusData::default(),
            open: false,
        }
    }

    pub fn constraint_id(&self) -> Option<&str> {
        self.input_params
            .get(CONSTRAINT_ID_PARAM)
            .and_then(Value::as_str)
    }

    pub fn apply_immediately(&self) -> bool {
        self.input_params
            .get(APPLY_IMMEDIATELY_PARAM)
            .map(history_types::is_truthy)
            .unwrap_or(true)
    }
}

/// What a constraint reports from one `solve` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub ok: bool,
    pub satisfied: bool,
    /// Whether a correction was applied to any component.
    pub applied: bool,
    /// Explicit status. Inferred from the flags when absent.
    pub status: Option<SolveStatus>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub diagnostics: Value,
}

impl SolveOutcome {
    pub fn satisfied() -> Self {
        Self {
            ok: true,
            satisfied: true,
            applied: false,
            status: None,
            message: None,
            error: None,
            diagnostics: Value::Null,
        }
    }

    pub fn adjusted() -> Self {
        Self {
            satisfied: false,
            applied: true,
            ..Self::satisfied()
        }
    }

    pub fn pending() -> Self {
        Self {
            satisfied: false,
            ..Self::satisfied()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            satisfied: false,
            error: Some(error.into()),
            ..Self::satisfied()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Value) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// `error` if not ok, else `satisfied`, else `adjusted` if a correction
    /// was applied, else `pending`.
    pub fn inferred_status(&self) -> SolveStatus {
        if let Some(status) = self.status {
            return status;
        }
        if !self.ok {
            SolveStatus::Error
        } else if self.satisfied {
            SolveStatus::Satisfied
        } else if self.applied {
            SolveStatus::Adjusted
        } else {
            SolveStatus::Pending
        }
    }
}

/// Normalized per-constraint result of a solver pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintResult {
    #[serde(rename = "constraintID")]
    pub constraint_id: String,
    #[serde(rename = "type")]
    pub constraint_type: String,
    pub ok: bool,
    pub status: SolveStatus,
    pub satisfied: bool,
    pub applied: bool,
    pub error: Option<String>,
    pub message: Option<String>,
    /// Iteration that produced this result. `None` if the constraint never ran.
    pub iteration: Option<usize>,
    pub diagnostics: Value,
}

impl ConstraintResult {
    pub(crate) fn pending(record: &ConstraintRecord) -> Self {
        Self {
            constraint_id: record.constraint_id().unwrap_or_default().to_string(),
            constraint_type: record.constraint_type.clone(),
            ok: true,
            status: SolveStatus::Pending,
            satisfied: false,
            applied: false,
            error: None,
            message: None,
            iteration: None,
            diagnostics: Value::Null,
        }
    }

    pub(crate) fn from_outcome(
        record: &ConstraintRecord,
        mut outcome: SolveOutcome,
        iteration: usize,
        mutated: bool,
    ) -> Self {
        // A context mutation is a correction whatever the constraint reported.
        outcome.applied |= mutated;
        let status = outcome.inferred_status();
        Self {
            ok: outcome.ok,
            status,
            satisfied: outcome.satisfied,
            applied: outcome.applied,
            error: outcome.error,
            message: outcome.message,
            iteration: Some(iteration),
            diagnostics: outcome.diagnostics,
            ..Self::pending(record)
        }
    }

    pub(crate) fn error(record: &ConstraintRecord, error: String, iteration: Option<usize>) -> Self {
        Self {
            ok: false,
            status: SolveStatus::Error,
            error: Some(error),
            iteration,
            ..Self::pending(record)
        }
    }

    pub(crate) fn to_status_data(&self, at: DateTime<Utc>) -> ConstraintStatusData {
        ConstraintStatusData {
            status: self.status,
            message: self.message.clone(),
            satisfied: self.satisfied,
            error: self.error.clone(),
            last_run_at: Some(at),
            last_iteration: self.iteration,
        }
    }
}

/// Summary of one `run_all` pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveReport {
    /// One result per constraint record, in list order.
    pub results: Vec<ConstraintResult>,
    /// Full sweeps over the constraint list that finished.
    pub iterations_completed: usize,
    /// A sweep finished without any constraint applying a correction.
    pub converged: bool,
    /// The pass stopped on the cancellation token.
    pub aborted: bool,
}

impl SolveReport {
    pub fn result(&self, constraint_id: &str) -> Option<&ConstraintResult> {
        self.results.iter().find(|r| r.constraint_id == constraint_id)
    }

    pub fn all_satisfied(&self) -> bool {
        self.results.iter().all(|r| r.satisfied)
    }
}

/// Errors a constraint raises from `solve`. Converted to `error` results.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConstraintError {
    #[error("constraint does not implement solve")]
    NotImplemented,

    #[error("could not resolve '{reference}'")]
    Unresolved { reference: String },

    #[error("'{reference}' is not inside an assembly component")]
    NotAComponent { reference: String },

    #[error("invalid parameter {key}: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Errors from constraint list operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HistoryError {
    #[error("missing constraint type: {constraint_type}")]
    MissingConstraint { constraint_type: String },

    #[error("constraint not found: {id}")]
    ConstraintNotFound { id: String },
}
