use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Metadata key holding the last save time (RFC 3339).
pub const MODIFIED_KEY: &str = "modified";
/// Metadata key holding the first save time (RFC 3339).
pub const CREATED_KEY: &str = "created";

/// Stamp `modified` with `now`, and `created` if the document never had one.
/// Other metadata keys are left alone.
pub fn stamp_saved(metadata: &mut Map<String, Value>, now: DateTime<Utc>) {
    let stamp = Value::String(now.to_rfc3339());
    metadata
        .entry(CREATED_KEY)
        .or_insert_with(|| stamp.clone());
    metadata.insert(MODIFIED_KEY.into(), stamp);
}

/// Parse the `modified` stamp, if present and well-formed.
pub fn modified_at(metadata: &Map<String, Value>) -> Option<DateTime<Utc>> {
    metadata
        .get(MODIFIED_KEY)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
