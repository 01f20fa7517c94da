use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the sanitizer interprets a raw parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Number or expression string, evaluated against the expression buffer.
    Number,
    /// Scene object names or handles, resolved to nodes.
    ReferenceSelection,
    /// A boolean combine descriptor with target references.
    BooleanOperation,
    /// Position / Euler rotation / scale triple.
    Transform,
    /// A three-component vector.
    Vec3,
    /// A truthy flag.
    Boolean,
    String,
    /// Any other widget type. Values pass through unchanged.
    #[serde(untagged)]
    Other(String),
}

/// Declaration of a single input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether a reference selection accepts more than one object.
    #[serde(default)]
    pub multiple: bool,
}

impl ParamSpec {
    pub fn new(param_type: ParamType, default_value: Value) -> Self {
        Self {
            param_type,
            default_value,
            hint: None,
            multiple: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }
}

/// Ordered declarative parameter schema of a feature or constraint class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    entries: Vec<(String, ParamSpec)>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. A repeated key replaces the earlier spec in place.
    pub fn param(mut self, key: impl Into<String>, spec: ParamSpec) -> Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = spec,
            None => self.entries.push((key, spec)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamSpec> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamSpec)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh map of every declared default.
    pub fn defaults(&self) -> Map<String, Value> {
        let mut out = Map::new();
        self.fill_defaults(&mut out);
        out
    }

    /// Insert a clone of the default for every schema key missing from `params`.
    ///
    /// `Value::clone` is a deep copy, so no default tree is ever shared
    /// between two records.
    pub fn fill_defaults(&self, params: &mut Map<String, Value>) {
        for (key, spec) in &self.entries {
            if !params.contains_key(key) {
                params.insert(key.clone(), spec.default_value.clone());
            }
        }
    }
}
