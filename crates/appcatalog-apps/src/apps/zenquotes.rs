//! Zen Quotes -- random inspirational quotes.  No authentication.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use appcatalog_core::{
    ApiClient, AppCategory, AppError, Application, AuthRequirement, HttpSettings, IMPORTANT_TAG,
    Result, ToolDefinition,
};

const BASE_URL: &str = "https://zenquotes.io/api";

#[derive(Debug, Clone)]
pub struct ZenquotesApp {
    base_url: String,
    settings: HttpSettings,
    client: OnceCell<ApiClient>,
}

impl Default for ZenquotesApp {
    fn default() -> Self {
        Self::new()
    }
}

impl ZenquotesApp {
    pub fn new() -> Self {
        Self::with_settings(&HttpSettings::default())
    }

    pub fn with_settings(settings: &HttpSettings) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            settings: settings.clone(),
            client: OnceCell::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self.client = OnceCell::new();
        self
    }

    async fn client(&self) -> Result<&ApiClient> {
        self.client
            .get_or_try_init(|| async {
                ApiClient::with_settings("zenquotes", &self.base_url, &self.settings)
            })
            .await
    }

    async fn tool_get_random_quote(&self) -> Result<Value> {
        let response = self.client().await?.get("random").await?;
        let first = response
            .as_array()
            .and_then(|quotes| quotes.first())
            .ok_or_else(|| AppError::NotFound("zenquotes returned no quotes".into()))?;

        let field = |key: &str| {
            first.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
                AppError::Internal(format!("zenquotes quote is missing field `{key}`"))
            })
        };
        Ok(json!({ "quote": field("q")?, "author": field("a")? }))
    }
}

#[async_trait]
impl Application for ZenquotesApp {
    fn name(&self) -> &str {
        "zenquotes"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Productivity
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "get_random_quote",
            "Fetch a random inspirational quote and its author",
            json!({ "type": "object", "properties": {} }),
            &["fetch", "quotes", IMPORTANT_TAG],
        )]
    }

    async fn execute_tool(&self, name: &str, _params: Value) -> Result<Value> {
        match name {
            "get_random_quote" => self.tool_get_random_quote().await,
            _ => Err(AppError::ToolNotFound {
                app: self.name().to_string(),
                tool: name.to_string(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn returns_quote_and_author() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/random");
                then.status(200)
                    .json_body(json!([{"q": "Be here now.", "a": "Ram Dass", "h": "<p/>"}]));
            })
            .await;

        let app = ZenquotesApp::new().with_base_url(&server.base_url());
        let out = app.execute_tool("get_random_quote", json!({})).await.unwrap();

        mock.assert_async().await;
        assert_eq!(out, json!({"quote": "Be here now.", "author": "Ram Dass"}));
    }

    #[tokio::test]
    async fn empty_array_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/random");
                then.status(200).json_body(json!([]));
            })
            .await;

        let app = ZenquotesApp::new().with_base_url(&server.base_url());
        let err = app
            .execute_tool("get_random_quote", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn custom_base_url_keeps_settings() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/random")
                    .header("user-agent", "quotes-test/2");
                then.status(200).json_body(json!([{"q": "Breathe.", "a": "Anon"}]));
            })
            .await;

        let settings = HttpSettings {
            user_agent: "quotes-test/2".into(),
            ..HttpSettings::default()
        };
        let app = ZenquotesApp::with_settings(&settings).with_base_url(&server.base_url());
        let out = app.execute_tool("get_random_quote", json!({})).await.unwrap();

        mock.assert_async().await;
        assert_eq!(out["author"], "Anon");
    }
}
