//! Marshaling of caller-supplied tool arguments.
//!
//! Agents send tool arguments as one JSON object.  Some frameworks wrap the
//! optional knobs in a nested `"options"` object, some send them flat, and
//! most send explicit `null`s for everything they did not set.  These
//! helpers normalise all of that before a request body is built.

use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Hoist the keys of a nested `"options"` object to the top level.
///
/// Explicit top-level keys win over nested ones.  A non-object `options`
/// value is left untouched.
pub fn flatten_options(params: Value) -> Value {
    let Value::Object(mut map) = params else {
        return params;
    };
    if let Some(Value::Object(nested)) = map.get("options").cloned() {
        map.remove("options");
        for (k, v) in nested {
            map.entry(k).or_insert(v);
        }
    }
    Value::Object(map)
}

/// Drop every `null` entry from an object.
pub fn prune_nulls(mut obj: Map<String, Value>) -> Map<String, Value> {
    obj.retain(|_, v| !v.is_null());
    obj
}

/// Build a request body from the listed keys of `params`, skipping absent
/// and `null` entries.
pub fn pick(params: &Value, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|k| {
            let v = params.get(*k)?;
            (!v.is_null()).then(|| (k.to_string(), v.clone()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Typed getters
// ---------------------------------------------------------------------------

/// Extract a required string field.
pub fn require_str<'a>(params: &'a Value, field: &str, tool_name: &str) -> Result<&'a str> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            AppError::invalid_params(tool_name, format!("missing required string field `{field}`"))
        })
}

/// Extract an optional, non-empty string field.
pub fn optional_str<'a>(params: &'a Value, field: &str) -> Option<&'a str> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Extract an optional unsigned integer.  Numeric strings are accepted since
/// some agents quote every argument.
pub fn optional_u64(params: &Value, field: &str) -> Option<u64> {
    match params.get(field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract an optional float.
pub fn optional_f64(params: &Value, field: &str) -> Option<f64> {
    match params.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract an optional boolean.
pub fn optional_bool(params: &Value, field: &str) -> Option<bool> {
    match params.get(field)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Extract a required array field.
pub fn require_array<'a>(
    params: &'a Value,
    field: &str,
    tool_name: &str,
) -> Result<&'a Vec<Value>> {
    params
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            AppError::invalid_params(tool_name, format!("missing required array field `{field}`"))
        })
}

/// Extract a required object field.
pub fn require_object<'a>(
    params: &'a Value,
    field: &str,
    tool_name: &str,
) -> Result<&'a Map<String, Value>> {
    params
        .get(field)
        .and_then(|v| v.as_object())
        .ok_or_else(|| {
            AppError::invalid_params(tool_name, format!("missing required object field `{field}`"))
        })
}

/// Extract an optional string-to-string map (headers, query parameters).
/// Non-string values are rendered with their JSON text.
pub fn string_pairs(params: &Value, field: &str) -> Vec<(String, String)> {
    params
        .get(field)
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}
