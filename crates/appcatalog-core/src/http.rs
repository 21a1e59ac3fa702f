//! Authenticated REST client shared by every HTTP-backed application.
//!
//! An [`ApiClient`] knows its application's base URL, how to authenticate,
//! and how to turn vendor responses into either a JSON value or a typed
//! [`AppError`].  Applications build one lazily from their credentials and
//! keep it for the lifetime of the instance.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::{AppError, Result};
use crate::response::{error_message, normalize_response};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// How requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// No authentication.
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// An arbitrary header, e.g. `xc-token: <token>` or `x-api-key: <key>`.
    Header { name: String, value: String },
    /// HTTP basic authentication.
    Basic { username: String, password: String },
}

/// Request body variants.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A single request against an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: RequestBody,
    retryable: Option<bool>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            retryable: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn queries(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(pairs);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    /// Override whether transient failures may be retried.  By default only
    /// idempotent methods (GET, HEAD, OPTIONS, PUT, DELETE) are.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or_else(|| self.method.is_idempotent())
    }
}

/// REST client bound to one vendor API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    app: String,
    base_url: String,
    auth: AuthScheme,
    default_headers: Vec<(String, String)>,
    retry: RetryPolicy,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a client with default HTTP settings and no authentication.
    pub fn new(app: &str, base_url: &str) -> Result<Self> {
        Self::with_settings(app, base_url, &HttpSettings::default())
    }

    /// Create a client using explicit HTTP settings.
    pub fn with_settings(app: &str, base_url: &str, settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build {app} HTTP client: {e}")))?;

        Ok(Self {
            app: app.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: AuthScheme::None,
            default_headers: Vec::new(),
            retry: settings.retry_policy(),
            timeout_secs: settings.timeout_seconds,
            client,
        })
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.default_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthScheme {
        &self.auth
    }

    /// Resolve a path against the base URL.  Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if has_http_scheme(path) {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    // -----------------------------------------------------------------------
    // Convenience verbs
    // -----------------------------------------------------------------------

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn get_query(&self, path: &str, query: Vec<(String, String)>) -> Result<Value> {
        self.execute(ApiRequest::get(path).queries(query)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(ApiRequest::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(ApiRequest::new(Method::PUT, path).json(body))
            .await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(ApiRequest::new(Method::PATCH, path).json(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.execute(ApiRequest::new(Method::DELETE, path)).await
    }

    pub async fn delete_with_body(&self, path: &str, body: Value) -> Result<Value> {
        self.execute(ApiRequest::new(Method::DELETE, path).json(body))
            .await
    }

    pub async fn post_form(&self, path: &str, form: Vec<(String, String)>) -> Result<Value> {
        self.execute(ApiRequest::post(path).form(form)).await
    }

    /// Generic verb: any method, optional query pairs, optional JSON body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request = ApiRequest::new(method, path).queries(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Send `request`, retrying transient failures per the client's policy.
    /// Requests that are not retryable get a single attempt.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        let policy = if request.is_retryable() {
            self.retry
        } else {
            RetryPolicy::none()
        };
        retry_with_backoff(policy, || self.send_once(&request)).await
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<Value> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &self.auth {
            AuthScheme::None => builder,
            AuthScheme::Bearer(token) => builder.bearer_auth(token),
            AuthScheme::Header { name, value } => builder.header(name.as_str(), value.as_str()),
            AuthScheme::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        };

        for (name, value) in self.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        debug!(app = %self.app, method = %request.method, url = %url, "sending request");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout {
                    seconds: self.timeout_secs,
                    reason: format!("{} request to `{url}` timed out", self.app),
                }
            } else {
                AppError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(
            app = %self.app,
            url = %url,
            status,
            body_length = body.len(),
            "response received"
        );

        if !(200..300).contains(&status) {
            let message = error_message(&String::from_utf8_lossy(&body));
            return Err(status_error(&self.app, status, message));
        }

        Ok(normalize_response(status, &headers, &body))
    }
}

/// Whether `path` is an absolute http(s) URL.  Schemes are case-insensitive.
fn has_http_scheme(path: &str) -> bool {
    path.split_once("://")
        .is_some_and(|(scheme, _)| matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https"))
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn status_error(app: &str, status: u16, message: String) -> AppError {
    match status {
        401 | 403 => AppError::NotAuthorized(format!(
            "{app} rejected the credentials ({status}): {message}"
        )),
        404 => AppError::NotFound(message),
        429 => AppError::RateLimited(message),
        _ => AppError::Api { status, message },
    }
}
