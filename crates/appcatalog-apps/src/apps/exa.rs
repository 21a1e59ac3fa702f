//! Exa -- neural web search, similar-page discovery, page contents and
//! synthesized answers.
//!
//! Every tool is one `POST` whose body is built from the caller's arguments
//! with unset (`null`) fields dropped, so the endpoint table below is all
//! there is to each tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use appcatalog_core::options::{flatten_options, pick, require_str};
use appcatalog_core::{
    ApiClient, AppCategory, AppError, Application, AuthRequirement, AuthScheme, CredentialCell,
    HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result, ToolDefinition,
};

use super::{API_KEY_ALIASES, health_from, unknown_tool};

const BASE_URL: &str = "https://api.exa.ai";

/// `(field, JSON type, description)`.
type Field = (&'static str, &'static str, &'static str);

const FILTERS: &[Field] = &[
    ("numResults", "integer", "Number of results to return"),
    ("includeDomains", "array", "Only return results from these domains"),
    ("excludeDomains", "array", "Never return results from these domains"),
    ("startCrawlDate", "string", "ISO 8601 date; links crawled after it"),
    ("endCrawlDate", "string", "ISO 8601 date; links crawled before it"),
    ("startPublishedDate", "string", "ISO 8601 date; published after it"),
    ("endPublishedDate", "string", "ISO 8601 date; published before it"),
    ("includeText", "array", "Strings that must appear in the page text"),
    ("excludeText", "array", "Strings that must not appear in the page text"),
    ("contents", "object", "Which page contents to return with each result"),
];

struct Endpoint {
    tool: &'static str,
    path: &'static str,
    description: &'static str,
    /// The one required field.
    required: Field,
    fields: &'static [Field],
    shares_filters: bool,
}

const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        tool: "search_with_filters",
        path: "search",
        description: "Search the web with optional filters on type, category, domains, dates and page text",
        required: ("query", "string", "The search query"),
        fields: &[
            ("useAutoprompt", "boolean", "Rewrite the query into an Exa-style query"),
            ("type", "string", "neural, keyword or auto (default)"),
            ("category", "string", "Data category to focus on, e.g. `research paper`"),
        ],
        shares_filters: true,
    },
    Endpoint {
        tool: "find_similar_by_url",
        path: "findSimilar",
        description: "Find pages similar to a given URL, with the same filters as search",
        required: ("url", "string", "The page to find similar pages for"),
        fields: &[],
        shares_filters: true,
    },
    Endpoint {
        tool: "fetch_page_content",
        path: "contents",
        description: "Fetch the text, highlights or summary of a list of URLs, optionally live-crawling them",
        required: ("urls", "array", "URLs to fetch"),
        fields: &[
            ("ids", "array", "Deprecated alias of `urls`"),
            ("text", "boolean", "Return the full page text"),
            ("highlights", "object", "Return the most relevant snippets"),
            ("summary", "object", "Return a summary of each page"),
            ("livecrawl", "string", "never, fallback, always or auto"),
            ("livecrawlTimeout", "integer", "Live crawl timeout in milliseconds"),
            ("subpages", "integer", "Number of subpages to crawl"),
            ("subpageTarget", "string", "Keyword identifying the subpages to crawl"),
            ("extras", "object", "Extra parameters"),
        ],
        shares_filters: false,
    },
    Endpoint {
        tool: "answer",
        path: "answer",
        description: "Get a direct synthesized answer to a question, with the supporting sources",
        required: ("query", "string", "The question to answer"),
        fields: &[
            ("stream", "boolean", "Return a server-sent event stream"),
            ("text", "boolean", "Include the full text of the sources"),
            ("model", "string", "exa or exa-pro"),
        ],
        shares_filters: false,
    },
];

impl Endpoint {
    fn all_fields(&self) -> impl Iterator<Item = &Field> {
        let filters: &[Field] = if self.shares_filters { FILTERS } else { &[] };
        std::iter::once(&self.required)
            .chain(self.fields)
            .chain(filters)
    }

    fn definition(&self) -> ToolDefinition {
        let properties: Map<String, Value> = self
            .all_fields()
            .map(|(name, ty, description)| {
                let mut prop = json!({ "type": ty, "description": description });
                if *ty == "array" {
                    prop["items"] = json!({ "type": "string" });
                }
                (name.to_string(), prop)
            })
            .collect();
        ToolDefinition::new(
            self.tool,
            self.description,
            json!({ "type": "object", "properties": properties, "required": [self.required.0] }),
            &["search", IMPORTANT_TAG],
        )
    }

    fn body(&self, params: &Value) -> Result<Value> {
        let (required, ty, _) = self.required;
        let present = match ty {
            "array" => params
                .get(required)
                .and_then(|v| v.as_array())
                .is_some_and(|a| !a.is_empty()),
            _ => require_str(params, required, self.tool).is_ok_and(|s| !s.is_empty()),
        };
        if !present {
            return Err(AppError::invalid_params(
                self.tool,
                format!("missing required field `{required}`"),
            ));
        }
        let keys: Vec<&str> = self.all_fields().map(|(name, _, _)| *name).collect();
        Ok(Value::Object(pick(params, &keys)))
    }
}

pub struct ExaApp {
    base_url: String,
    settings: HttpSettings,
    client: CredentialCell<ApiClient>,
}

impl ExaApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            settings: HttpSettings::default(),
            client: CredentialCell::new("exa", integration),
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
                    .with_auth(AuthScheme::Header {
                        name: "x-api-key".into(),
                        value: key,
                    }))
            })
            .await
    }
}

#[async_trait]
impl Application for ExaApp {
    fn name(&self) -> &str {
        "exa"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Search
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        ENDPOINTS.iter().map(Endpoint::definition).collect()
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        let endpoint = ENDPOINTS
            .iter()
            .find(|e| e.tool == name)
            .ok_or_else(|| unknown_tool(self.name(), name))?;
        let body = endpoint.body(&flatten_options(params))?;
        debug!(tool = name, path = endpoint.path, "exa request");
        self.client().await?.post(endpoint.path, body).await
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("exa", &["api_key"]))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        health_from(self.client().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appcatalog_core::StaticIntegration;
    use httpmock::prelude::*;

    fn app(server: &MockServer) -> ExaApp {
        ExaApp::new(Some(StaticIntegration::shared("exa", &[("api_key", "exa-k")])))
            .with_base_url(&server.base_url())
    }

    #[tokio::test]
    async fn search_prunes_nulls_and_sends_key_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/search")
                    .header("x-api-key", "exa-k")
                    .json_body(json!({"query": "llm", "numResults": 3}));
                then.status(200).json_body(json!({"results": [{"url": "https://a"}]}));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "search_with_filters",
                json!({"query": "llm", "numResults": 3, "category": null, "unrelated": 1}),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(out["results"][0]["url"], "https://a");
    }

    #[tokio::test]
    async fn nested_options_are_flattened() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/findSimilar")
                    .json_body(json!({"url": "https://x", "includeDomains": ["arxiv.org"]}));
                then.status(200).json_body(json!({"results": []}));
            })
            .await;

        app(&server)
            .execute_tool(
                "find_similar_by_url",
                json!({"url": "https://x", "options": {"includeDomains": ["arxiv.org"]}}),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn contents_and_answer_hit_their_paths() {
        let server = MockServer::start_async().await;
        let contents = server
            .mock_async(|when, then| {
                when.method(POST).path("/contents");
                then.status(200).json_body(json!({"results": []}));
            })
            .await;
        let answer = server
            .mock_async(|when, then| {
                when.method(POST).path("/answer").json_body(json!({"query": "why?"}));
                then.status(200).json_body(json!({"answer": "because"}));
            })
            .await;

        let app = app(&server);
        app.execute_tool("fetch_page_content", json!({"urls": ["https://a"]}))
            .await
            .unwrap();
        let out = app
            .execute_tool("answer", json!({"query": "why?"}))
            .await
            .unwrap();

        contents.assert_async().await;
        answer.assert_async().await;
        assert_eq!(out["answer"], "because");
    }

    #[tokio::test]
    async fn missing_required_field_is_invalid() {
        let server = MockServer::start_async().await;
        let err = app(&server)
            .execute_tool("fetch_page_content", json!({"urls": []}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`urls`"));
    }

    #[test]
    fn every_tool_is_important() {
        let app = ExaApp::new(None);
        assert_eq!(app.tools().len(), 4);
        assert_eq!(app.tools_with_tag(IMPORTANT_TAG).len(), 4);
    }
}
