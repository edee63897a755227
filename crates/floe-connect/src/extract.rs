//! Record value field extraction
//!
//! Route fields are addressed with dotted path notation over the record
//! value, e.g. `meta.table` reads `{"meta": {"table": "db.orders"}}`.

use serde_json::Value as JsonValue;

/// Walk a dotted field path into a record value. Returns `None` when any
/// segment is missing or the value along the way is not an object.
pub fn extract_from_value<'a>(value: &'a JsonValue, field_path: &str) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in field_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Extract a route value as a string. Non-string scalars are stringified the
/// same way they would print, without JSON quoting.
pub fn extract_route_value(value: Option<&JsonValue>, field_path: &str) -> Option<String> {
    let value = value?;
    let routed = extract_from_value(value, field_path)?;
    Some(match routed {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    })
}
