//! Raw UI parameters to typed feature inputs.
//!
//! Sanitization never fails as a whole: a field that cannot be interpreted
//! degrades (an unevaluable number becomes `Number(None)`, an unresolvable
//! reference is dropped) and the rest of the params still sanitize.

use std::collections::BTreeMap;

use expression::{Evaluate, ExpressionContext};
use history_types::{as_finite_f64, is_truthy, ParamSchema, ParamType, TransformParams};
use scene_graph::{NodeId, Scene};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Boolean combine applied by a feature to its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BooleanKind {
    #[default]
    None,
    Union,
    Subtract,
    Intersect,
}

impl BooleanKind {
    /// Case-insensitive parse. Unknown names read as `None`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "UNION" => Self::Union,
            "SUBTRACT" | "DIFFERENCE" => Self::Subtract,
            "INTERSECT" | "INTERSECTION" => Self::Intersect,
            _ => Self::None,
        }
    }
}

/// Default `biasDistance` when the raw value is missing or not finite.
pub const DEFAULT_BIAS_DISTANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanOperation {
    pub operation: BooleanKind,
    pub targets: Vec<NodeId>,
    pub bias_distance: f64,
    pub offset_coplanar_cap: Option<String>,
    pub offset_distance: Option<f64>,
}

/// A sanitized parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// `None` when the expression could not be evaluated.
    Number(Option<f64>),
    References(Vec<NodeId>),
    BooleanOperation(BooleanOperation),
    Transform(TransformParams),
    Vec3([f64; 3]),
    Boolean(bool),
    /// Types without special handling, and keys outside the schema.
    Raw(Value),
}

/// Typed parameters handed to a feature's `run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedParams {
    values: BTreeMap<String, ParamValue>,
}

impl SanitizedParams {
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.values.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            ParamValue::Number(n) => *n,
            ParamValue::Raw(v) => as_finite_f64(v),
            _ => None,
        }
    }

    /// Resolved references. Empty for missing keys.
    pub fn references(&self, key: &str) -> &[NodeId] {
        match self.values.get(key) {
            Some(ParamValue::References(ids)) => ids,
            Some(ParamValue::BooleanOperation(op)) => &op.targets,
            _ => &[],
        }
    }

    pub fn boolean(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(ParamValue::Boolean(b)) => *b,
            Some(ParamValue::Raw(v)) => is_truthy(v),
            _ => false,
        }
    }

    pub fn vec3(&self, key: &str) -> Option<[f64; 3]> {
        match self.values.get(key)? {
            ParamValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn transform(&self, key: &str) -> Option<&TransformParams> {
        match self.values.get(key)? {
            ParamValue::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn boolean_operation(&self, key: &str) -> Option<&BooleanOperation> {
        match self.values.get(key)? {
            ParamValue::BooleanOperation(op) => Some(op),
            _ => None,
        }
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        match self.values.get(key)? {
            ParamValue::Raw(v) => Some(v),
            _ => None,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.raw(key).and_then(Value::as_str)
    }
}

/// Everything sanitization reads besides the params themselves.
pub struct SanitizeEnv<'a> {
    pub scene: &'a Scene,
    pub evaluator: &'a dyn Evaluate,
    pub expressions: &'a ExpressionContext,
}

/// Inverted boolean aliases kept for older documents.
const BOOLEAN_ALIASES: [(&str, &str); 2] =
    [("copy", "replaceOriginal"), ("replaceOriginal", "copy")];

static NULL: Value = Value::Null;

/// Sanitize raw `input` against `schema`.
pub fn sanitize(
    schema: &ParamSchema,
    input: &Map<String, Value>,
    env: &SanitizeEnv<'_>,
) -> SanitizedParams {
    let mut out = SanitizedParams::default();

    for (key, spec) in schema.iter() {
        let raw = match input.get(key) {
            Some(v) => v.clone(),
            None => match legacy_alias(key, input) {
                Some(v) => v,
                None => spec.default_value.clone(),
            },
        };
        let value = match &spec.param_type {
            ParamType::Number => {
                let n = number(&raw, env);
                if n.is_none() && !raw.is_null() {
                    debug!(key, raw = %raw, "number parameter did not evaluate");
                }
                ParamValue::Number(n)
            }
            ParamType::ReferenceSelection => ParamValue::References(references(&raw, env.scene)),
            ParamType::BooleanOperation => {
                ParamValue::BooleanOperation(boolean_operation(&raw, env))
            }
            ParamType::Transform => ParamValue::Transform(transform(&raw, env)),
            ParamType::Vec3 => ParamValue::Vec3(triple(&raw, [0.0; 3], env)),
            ParamType::Boolean => ParamValue::Boolean(is_truthy(&raw)),
            ParamType::String | ParamType::Other(_) => ParamValue::Raw(raw),
        };
        out.insert(key, value);
    }

    for (key, raw) in input {
        if schema.get(key).is_none() {
            out.insert(key.clone(), ParamValue::Raw(raw.clone()));
        }
    }
    out
}

fn legacy_alias(key: &str, input: &Map<String, Value>) -> Option<Value> {
    BOOLEAN_ALIASES
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, alias)| input.get(*alias))
        .map(|v| Value::Bool(!is_truthy(v)))
}

/// Number or expression. Plain numbers pass through; strings are evaluated
/// against the expression buffer.
pub fn number(raw: &Value, env: &SanitizeEnv<'_>) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => env.expressions.evaluate(env.evaluator, s),
        _ => None,
    }
}

/// Resolve a name, a `{uuid}` / `{name}` object, or an array of those.
/// Unresolvable entries are dropped.
pub fn references(raw: &Value, scene: &Scene) -> Vec<NodeId> {
    let mut out = Vec::new();
    collect_references(raw, scene, &mut out);
    out
}

fn collect_references(raw: &Value, scene: &Scene, out: &mut Vec<NodeId>) {
    let found = match raw {
        Value::Array(items) => {
            for item in items {
                collect_references(item, scene, out);
            }
            return;
        }
        Value::Null => return,
        Value::String(name) => scene.get_object_by_name(name),
        Value::Object(map) => {
            // A uuid is a direct handle: accepted without name lookup.
            let by_uuid = map
                .get("uuid")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .and_then(|u| scene.find_by_uuid(u));
            by_uuid.or_else(|| {
                map.get("name")
                    .and_then(Value::as_str)
                    .and_then(|n| scene.get_object_by_name(n))
            })
        }
        _ => None,
    };
    match found {
        Some(id) => out.push(id),
        None => debug!(reference = %raw, "reference did not resolve"),
    }
}

fn boolean_operation(raw: &Value, env: &SanitizeEnv<'_>) -> BooleanOperation {
    let field = |key: &str| raw.get(key).unwrap_or(&NULL);
    BooleanOperation {
        operation: field("operation")
            .as_str()
            .map(BooleanKind::parse)
            .unwrap_or_default(),
        targets: references(field("targets"), env.scene),
        bias_distance: number(field("biasDistance"), env).unwrap_or(DEFAULT_BIAS_DISTANCE),
        offset_coplanar_cap: field("offsetCoplanarCap").as_str().map(str::to_string),
        offset_distance: number(field("offsetDistance"), env),
    }
}

fn transform(raw: &Value, env: &SanitizeEnv<'_>) -> TransformParams {
    let field = |key: &str| raw.get(key).unwrap_or(&NULL);
    TransformParams {
        position: triple(field("position"), [0.0; 3], env),
        rotation_euler: triple(field("rotationEuler"), [0.0; 3], env),
        scale: triple(field("scale"), [1.0; 3], env),
    }
}

/// `[x, y, z]` or `{x, y, z}`, each a number or expression.
fn triple(raw: &Value, default: [f64; 3], env: &SanitizeEnv<'_>) -> [f64; 3] {
    let mut out = default;
    for (i, slot) in out.iter_mut().enumerate() {
        let component = match raw {
            Value::Array(items) => items.get(i),
            Value::Object(map) => map.get(["x", "y", "z"][i]),
            _ => None,
        };
        if let Some(v) = component.and_then(|c| number(c, env)) {
            *slot = v;
        }
    }
    out
}
