//! Response normalisation.
//!
//! Vendors answer with JSON, with an empty body (204), or occasionally with
//! HTML/plain text.  Tools always hand the agent a JSON value, and failures
//! can be rendered as the descriptive one-line strings agents cope with best.

use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::{AppError, Result};

/// Turn a successful HTTP response body into a JSON value.
///
/// - empty body: `{"status": "success", "status_code": n}`
/// - JSON body: the parsed value
/// - anything else: `{"text", "status_code", "headers"}`
pub fn normalize_response(status: u16, headers: &HeaderMap, body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return json!({ "status": "success", "status_code": status });
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(_) => {
            let content_type = headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("<none>");
            warn!(content_type, status, "response is not JSON, returning text");
            json!({
                "text": String::from_utf8_lossy(body),
                "status_code": status,
                "headers": header_map(headers),
            })
        }
    }
}

/// Flatten response headers into a sorted string map.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect()
}

/// Pull a human-readable message out of a vendor error body.
///
/// Looks at `message`, `error` (string), `error.message`, `errors[0].message`
/// and `detail`, then falls back to the raw text.
pub fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let candidates = [
        value.get("message"),
        value.get("error").filter(|e| e.is_string()),
        value.get("error").and_then(|e| e.get("message")),
        value
            .get("errors")
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("message")),
        value.get("detail"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| value.to_string())
}

/// Format a failure the way tools report it to agents:
/// `"Error <context>: <Kind> - <message>"`.
pub fn error_string(context: &str, err: &AppError) -> String {
    format!("Error {context}: {} - {err}", err.kind())
}

/// The uniform shape of a tool invocation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(Value),
    Error(String),
}

impl ToolOutcome {
    /// Collapse a tool result into the uniform shape, describing errors with
    /// `context` (e.g. `"calling airtable.list_bases"`).
    pub fn from_result(context: &str, result: Result<Value>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Error(error_string(context, &e)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The JSON form handed back to agents: the value itself on success, the
    /// error string on failure.
    pub fn into_value(self) -> Value {
        match self {
            Self::Success(v) => v,
            Self::Error(s) => Value::String(s),
        }
    }
}
