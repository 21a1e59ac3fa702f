//! Raw HTTP application -- call any URL with any of the five common verbs.
//!
//! Error statuses are errors.  JSON responses are returned parsed; anything
//! else comes back as `{text, status_code, headers}`.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

use appcatalog_core::options::{require_str, string_pairs};
use appcatalog_core::{
    ApiClient, ApiRequest, AppCategory, AppError, Application, AuthRequirement, HttpSettings,
    IMPORTANT_TAG, Result, ToolDefinition,
};

/// Generic HTTP application.  Needs no credentials.
#[derive(Debug, Clone)]
pub struct HttpToolsApp {
    settings: HttpSettings,
    client: OnceCell<ApiClient>,
}

impl Default for HttpToolsApp {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpToolsApp {
    pub fn new() -> Self {
        Self::with_settings(&HttpSettings::default())
    }

    pub fn with_settings(settings: &HttpSettings) -> Self {
        Self {
            settings: settings.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&ApiClient> {
        self.client
            .get_or_try_init(|| async {
                ApiClient::with_settings("http_tools", "", &self.settings)
            })
            .await
    }

    async fn send(&self, tool: &str, method: Method, params: Value) -> Result<Value> {
        let url = require_str(&params, "url", tool)?;
        let parsed = url::Url::parse(url)
            .map_err(|e| AppError::invalid_params(tool, format!("invalid URL `{url}`: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::invalid_params(
                tool,
                format!("unsupported URL scheme `{}`", parsed.scheme()),
            ));
        }

        let headers = string_pairs(&params, "headers");
        debug!(tool, method = %method, url, headers = headers.len(), "http tool request");

        let mut request = ApiRequest::new(method.clone(), parsed.as_str())
            .headers(headers)
            .queries(string_pairs(&params, "query_params"));
        // DELETE ignores the body, matching what most servers accept.
        if method != Method::DELETE
            && let Some(body) = params.get("body").filter(|b| !b.is_null())
        {
            request = request.json(body.clone());
        }
        self.client().await?.execute(request).await
    }
}

fn schema(with_body: bool) -> Value {
    let mut properties = json!({
        "url": { "type": "string", "description": "Absolute http(s) URL" },
        "headers": {
            "type": "object",
            "description": "Extra request headers",
            "additionalProperties": { "type": "string" }
        }
    });
    if with_body {
        properties["body"] = json!({ "type": "object", "description": "JSON request body" });
    } else {
        properties["query_params"] =
            json!({ "type": "object", "description": "Query string parameters" });
    }
    json!({ "type": "object", "properties": properties, "required": ["url"] })
}

#[async_trait]
impl Application for HttpToolsApp {
    fn name(&self) -> &str {
        "http_tools"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Developer
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "http_get",
                "Send a GET request with optional headers and query parameters",
                schema(false),
                &["get", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "http_post",
                "Send a POST request with an optional JSON body",
                schema(true),
                &["post", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "http_put",
                "Send a PUT request to replace a resource",
                schema(true),
                &["put", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "http_delete",
                "Send a DELETE request",
                schema(false),
                &["delete", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "http_patch",
                "Send a PATCH request to partially update a resource",
                schema(true),
                &["patch", IMPORTANT_TAG],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        let method = match name {
            "http_get" => Method::GET,
            "http_post" => Method::POST,
            "http_put" => Method::PUT,
            "http_delete" => Method::DELETE,
            "http_patch" => Method::PATCH,
            _ => {
                return Err(AppError::ToolNotFound {
                    app: self.name().to_string(),
                    tool: name.to_string(),
                });
            }
        };
        self.send(name, method, params).await
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        None
    }
}
