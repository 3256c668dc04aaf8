use serde_json::Value;

use crate::client::ApiError;

const LIST_WRAPPERS: [&str; 4] = ["items", "records", "data", "results"];
const KEY_FIELDS: [&str; 2] = ["key", "_key"];

/// Unwraps a list response. Backends answer with a bare array or with the
/// array under one of a few wrapper fields.
pub fn records_from_payload(payload: Value) -> Result<Vec<Value>, ApiError> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for wrapper in LIST_WRAPPERS {
                if let Some(Value::Array(_)) = map.get(wrapper) {
                    if let Some(Value::Array(items)) = map.remove(wrapper) {
                        return Ok(items);
                    }
                }
            }
            Err(ApiError::UnexpectedShape(format!(
                "object without a record list (fields: {})",
                map.keys().cloned().collect::<Vec<_>>().join(", ")
            )))
        }
        other => Err(ApiError::UnexpectedShape(format!(
            "expected a record list, got {}",
            value_kind(&other)
        ))),
    }
}

/// Backend identity of a record, looked up on the record itself first and
/// then under its `data` wrapper.
pub fn record_key(record: &Value) -> Option<String> {
    key_field(record).or_else(|| record.get("data").and_then(key_field))
}

fn key_field(value: &Value) -> Option<String> {
    KEY_FIELDS.iter().find_map(|field| match value.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
