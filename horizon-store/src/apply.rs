use chrono::{DateTime, Utc};
use horizon_core::FieldValue;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Apply a field map onto a JSON object in place. `ServerTimestamp` resolves
/// to `now`, `Increment` adds to the current numeric value (missing fields
/// count as zero). Dotted names address nested objects and intermediate
/// objects are created as needed.
pub fn apply_fields(target: &mut Value, fields: &BTreeMap<String, FieldValue>, now: DateTime<Utc>) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    for (name, field) in fields {
        match field {
            FieldValue::Json(value) => set_path(target, name, value.clone()),
            FieldValue::ServerTimestamp => {
                set_path(target, name, Value::String(now.to_rfc3339()));
            }
            FieldValue::Increment(by) => {
                let current = value_at_path(target, name)
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                set_path(target, name, Value::from(current + by));
            }
        }
    }
}

pub fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut node = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = match node {
            Value::Object(map) => map,
            other => {
                *other = Value::Object(Map::new());
                other.as_object_mut().expect("just replaced with object")
            }
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = value;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Ordering over JSON values for query sorting. Missing values sort first;
/// RFC 3339 timestamps stored as strings compare chronologically because
/// the encoding is lexicographic.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}
