//! Perplexity -- web-search-grounded answers from the chat completions API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use appcatalog_core::options::{optional_f64, optional_str, require_str};
use appcatalog_core::{
    ApiClient, AppCategory, AppError, Application, AuthRequirement, AuthScheme, CredentialCell,
    HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result, ToolDefinition,
};

use super::{API_KEY_ALIASES, health_from, unknown_tool};

const BASE_URL: &str = "https://api.perplexity.ai";

/// Models the chat completions endpoint accepts.
pub const MODELS: &[&str] = &[
    "r1-1776",
    "sonar",
    "sonar-pro",
    "sonar-reasoning",
    "sonar-reasoning-pro",
    "sonar-deep-research",
];

const DEFAULT_MODEL: &str = "sonar-pro";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions using real-time information from the web.";

pub struct PerplexityApp {
    base_url: String,
    settings: HttpSettings,
    client: CredentialCell<ApiClient>,
}

impl PerplexityApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            settings: HttpSettings::default(),
            client: CredentialCell::new("perplexity", integration),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_settings(mut self, settings: HttpSettings) -> Self {
        self.settings = settings;
        self
    }

    async fn client(&self) -> Result<&ApiClient> {
        self.client
            .get_or_resolve(|app, creds| {
                let key = creds.require(app, "API key", API_KEY_ALIASES)?;
                Ok(ApiClient::with_settings(app, &self.base_url, &self.settings)?
                    .with_auth(AuthScheme::Bearer(key)))
            })
            .await
    }

    async fn tool_answer_with_search(&self, params: Value) -> Result<Value> {
        let query = require_str(&params, "query", "answer_with_search")?;
        let model = optional_str(&params, "model").unwrap_or(DEFAULT_MODEL);
        if !MODELS.contains(&model) {
            return Err(AppError::invalid_params(
                "answer_with_search",
                format!("unknown model `{model}` (expected one of: {})", MODELS.join(", ")),
            ));
        }
        let temperature = optional_f64(&params, "temperature").unwrap_or(1.0);
        // An explicit empty prompt disables the system message.
        let system_prompt = match params.get("system_prompt") {
            Some(Value::String(s)) => s.as_str(),
            _ => DEFAULT_SYSTEM_PROMPT,
        };

        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        messages.push(json!({"role": "user", "content": query}));

        debug!(model, temperature, "perplexity chat completion");
        let response = self
            .client()
            .await?
            .post(
                "chat/completions",
                json!({ "model": model, "messages": messages, "temperature": temperature }),
            )
            .await?;

        let content = response
            .pointer("/choices/0/message/content")
            .cloned()
            .ok_or_else(|| {
                AppError::Internal("perplexity response contained no choices".into())
            })?;
        let citations = response
            .get("citations")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(json!({ "content": content, "citations": citations }))
    }
}

#[async_trait]
impl Application for PerplexityApp {
    fn name(&self) -> &str {
        "perplexity"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Search
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "answer_with_search",
            "Answer a question with a web-search-grounded model, returning the content and its source citations",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The question to answer" },
                    "model": { "type": "string", "enum": MODELS, "default": DEFAULT_MODEL },
                    "temperature": { "type": "number", "default": 1 },
                    "system_prompt": { "type": "string", "description": "System message guiding the model (empty to omit)" }
                },
                "required": ["query"]
            }),
            &["search", "web", "research", "citations", IMPORTANT_TAG],
        )]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "answer_with_search" => self.tool_answer_with_search(params).await,
            _ => Err(unknown_tool(self.name(), name)),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("perplexity", &["api_key"]))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        health_from(self.client().await)
    }
}
