//! Minimal GraphQL-over-HTTP client.
//!
//! Queries and mutations are plain `POST {query, variables}` requests; the
//! `data` object is returned and a non-empty `errors` array becomes
//! [`AppError::GraphQl`].  Queries may be retried on transient failures;
//! mutations are sent once.

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::http::{ApiClient, ApiRequest};

/// GraphQL client on top of an [`ApiClient`] whose base URL is the endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    http: ApiClient,
}

impl GraphQlClient {
    pub fn new(http: ApiClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &ApiClient {
        &self.http
    }

    /// Run a query document.
    pub async fn query(&self, document: &str, variables: Value) -> Result<Value> {
        self.run(document, variables, true).await
    }

    /// Run a mutation document.
    pub async fn mutate(&self, document: &str, variables: Value) -> Result<Value> {
        self.run(document, variables, false).await
    }

    async fn run(&self, document: &str, variables: Value, retryable: bool) -> Result<Value> {
        let operation = operation_name(document);
        debug!(operation, retryable, "graphql request");
        let request = ApiRequest::post("")
            .json(json!({ "query": document, "variables": variables }))
            .retryable(retryable);
        extract_data(self.http.execute(request).await?)
    }
}

/// Split a GraphQL response into its `data`, failing on `errors`.
pub fn extract_data(mut response: Value) -> Result<Value> {
    if let Some(errors) = response.get("errors").and_then(|e| e.as_array())
        && !errors.is_empty()
    {
        let messages: Vec<String> = errors
            .iter()
            .map(|e| {
                e.get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string())
            })
            .collect();
        return Err(AppError::GraphQl(messages.join("; ")));
    }
    match response.get_mut("data").map(Value::take) {
        Some(Value::Null) | None => Err(AppError::GraphQl("response contained no data".into())),
        Some(data) => Ok(data),
    }
}

/// The operation name of a document (`query Me { .. }` -> `Me`), for logs.
fn operation_name(document: &str) -> &str {
    document
        .split_whitespace()
        .skip_while(|w| *w != "query" && *w != "mutation")
        .nth(1)
        .map(|w| w.split(['(', '{']).next().unwrap_or(w))
        .unwrap_or("anonymous")
}
