//! Resend -- transactional email, domains and audiences.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use appcatalog_core::options::{optional_bool, optional_str, pick, require_array, require_str};
use appcatalog_core::{
    ApiClient, AppCategory, AppError, Application, AuthRequirement, AuthScheme, CredentialCell,
    HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result, ToolDefinition,
};

use super::{API_KEY_ALIASES, health_from, path_id, unknown_tool};

const BASE_URL: &str = "https://api.resend.com";

/// Largest batch the batch endpoint accepts.
pub const MAX_BATCH: usize = 100;

pub struct ResendApp {
    base_url: String,
    settings: HttpSettings,
    client: CredentialCell<ApiClient>,
}

impl ResendApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            settings: HttpSettings::default(),
            client: CredentialCell::new("resend", integration),
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

    // -----------------------------------------------------------------------
    // Emails
    // -----------------------------------------------------------------------

    async fn tool_send_email(&self, params: Value) -> Result<Value> {
        let from = require_str(&params, "from_email", "send_email")?;
        let subject = require_str(&params, "subject", "send_email")?;
        let to = recipients(&params, "send_email")?;

        let mut body = json!({ "from": from, "to": to, "subject": subject });
        match (optional_str(&params, "text"), optional_str(&params, "html")) {
            (None, None) => {
                return Err(AppError::invalid_params(
                    "send_email",
                    "one of `text` or `html` is required",
                ));
            }
            (text, html) => {
                if let Some(text) = text {
                    body["text"] = json!(text);
                }
                if let Some(html) = html {
                    body["html"] = json!(html);
                }
            }
        }

        let sent = self.client().await?.post("emails", body).await?;
        info!(id = ?sent.get("id"), "email sent");
        Ok(sent)
    }

    async fn tool_send_batch_emails(&self, params: Value) -> Result<Value> {
        let emails = require_array(&params, "emails", "send_batch_emails")?;
        if emails.is_empty() || emails.len() > MAX_BATCH {
            return Err(AppError::invalid_params(
                "send_batch_emails",
                format!(
                    "the number of emails in a batch must be between 1 and {MAX_BATCH}, got {}",
                    emails.len()
                ),
            ));
        }
        debug!(count = emails.len(), "sending email batch");
        self.client()
            .await?
            .post("emails/batch", Value::Array(emails.clone()))
            .await
    }

    async fn tool_retrieve_email_by_id(&self, params: Value) -> Result<Value> {
        let id = path_id(&params, "email_id", "retrieve_email_by_id")?;
        self.client().await?.get(&format!("emails/{id}")).await
    }

    async fn tool_reschedule_email(&self, params: Value) -> Result<Value> {
        let id = path_id(&params, "email_id", "reschedule_email")?;
        let at = require_str(&params, "scheduled_at", "reschedule_email")?;
        self.client()
            .await?
            .patch(&format!("emails/{id}"), json!({ "scheduled_at": at }))
            .await
    }

    async fn tool_cancel_scheduled_email(&self, params: Value) -> Result<Value> {
        let id = path_id(&params, "email_id", "cancel_scheduled_email")?;
        self.client()
            .await?
            .post(&format!("emails/{id}/cancel"), json!({}))
            .await
    }

    // -----------------------------------------------------------------------
    // Domains
    // -----------------------------------------------------------------------

    async fn tool_create_domain(&self, params: Value) -> Result<Value> {
        let name = require_str(&params, "name", "create_domain")?;
        let mut body = pick(&params, &["region"]);
        body.insert("name".into(), json!(name));
        self.client()
            .await?
            .post("domains", Value::Object(body))
            .await
    }

    async fn tool_update_domain_settings(&self, params: Value) -> Result<Value> {
        let id = path_id(&params, "domain_id", "update_domain_settings")?;
        let body = pick(&params, &["open_tracking", "click_tracking", "tls"]);
        if body.is_empty() {
            return Err(AppError::invalid_params(
                "update_domain_settings",
                "at least one of `open_tracking`, `click_tracking` or `tls` is required",
            ));
        }
        self.client()
            .await?
            .patch(&format!("domains/{id}"), Value::Object(body))
            .await
    }

    async fn domain_call(&self, tool: &str, params: &Value) -> Result<Value> {
        let path = format!("domains/{}", path_id(params, "domain_id", tool)?);
        let client = self.client().await?;
        match tool {
            "get_domain" => client.get(&path).await,
            "verify_domain" => client.post(&format!("{path}/verify"), json!({})).await,
            "remove_domain" => client.delete(&path).await,
            _ => Err(unknown_tool(self.name(), tool)),
        }
    }

    // -----------------------------------------------------------------------
    // Audiences and contacts
    // -----------------------------------------------------------------------

    async fn tool_create_audience(&self, params: Value) -> Result<Value> {
        let name = require_str(&params, "name", "create_audience")?;
        self.client()
            .await?
            .post("audiences", json!({ "name": name }))
            .await
    }

    async fn tool_create_contact(&self, params: Value) -> Result<Value> {
        let audience = path_id(&params, "audience_id", "create_contact")?;
        let email = require_str(&params, "email", "create_contact")?;
        let mut body = pick(&params, &["first_name", "last_name"]);
        body.insert("email".into(), json!(email));
        body.insert(
            "unsubscribed".into(),
            json!(optional_bool(&params, "unsubscribed").unwrap_or(false)),
        );
        self.client()
            .await?
            .post(&format!("audiences/{audience}/contacts"), Value::Object(body))
            .await
    }

    async fn tool_list_contacts(&self, params: Value) -> Result<Value> {
        let audience = path_id(&params, "audience_id", "list_contacts")?;
        self.client()
            .await?
            .get(&format!("audiences/{audience}/contacts"))
            .await
    }
}

/// `to_emails` as a list, accepting a single address too.
fn recipients(params: &Value, tool: &str) -> Result<Vec<String>> {
    let to: Vec<String> = match params.get("to_emails") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    if to.is_empty() {
        return Err(AppError::invalid_params(
            tool,
            "`to_emails` must contain at least one address",
        ));
    }
    Ok(to)
}

fn id_schema(field: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { field: { "type": "string", "description": description } },
        "required": [field]
    })
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[async_trait]
impl Application for ResendApp {
    fn name(&self) -> &str {
        "resend"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Messaging
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "send_email",
                "Send one email to a list of recipients",
                json!({
                    "type": "object",
                    "properties": {
                        "from_email": { "type": "string", "description": "Sender, e.g. `Ana <ana@example.com>`" },
                        "to_emails": { "type": "array", "items": { "type": "string" } },
                        "subject": { "type": "string" },
                        "text": { "type": "string", "description": "Plain text body" },
                        "html": { "type": "string", "description": "HTML body" }
                    },
                    "required": ["from_email", "to_emails", "subject"]
                }),
                &["send", "email", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "send_batch_emails",
                "Send between 1 and 100 distinct emails in one request",
                json!({
                    "type": "object",
                    "properties": {
                        "emails": {
                            "type": "array",
                            "description": "Email objects with `from`, `to`, `subject` and `text` or `html`",
                            "items": { "type": "object" }
                        }
                    },
                    "required": ["emails"]
                }),
                &["batch", "send", "email"],
            ),
            ToolDefinition::new(
                "retrieve_email_by_id",
                "Fetch a sent email and its delivery status",
                id_schema("email_id", "Email id"),
                &["email", "read", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "reschedule_email",
                "Change when a scheduled email will be sent",
                json!({
                    "type": "object",
                    "properties": {
                        "email_id": { "type": "string" },
                        "scheduled_at": { "type": "string", "description": "ISO 8601 timestamp or natural language, e.g. `in 1 hour`" }
                    },
                    "required": ["email_id", "scheduled_at"]
                }),
                &["email", "schedule"],
            ),
            ToolDefinition::new(
                "cancel_scheduled_email",
                "Cancel an email that has not been sent yet",
                id_schema("email_id", "Email id"),
                &["email", "schedule"],
            ),
            ToolDefinition::new(
                "list_domains",
                "List the sending domains of the account",
                empty_schema(),
                &["domain", "list", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "create_domain",
                "Register a new sending domain",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Domain name, e.g. `mail.example.com`" },
                        "region": { "type": "string", "description": "us-east-1, eu-west-1, sa-east-1 or ap-northeast-1" }
                    },
                    "required": ["name"]
                }),
                &["domain", "create"],
            ),
            ToolDefinition::new(
                "get_domain",
                "Fetch a domain and its DNS records",
                id_schema("domain_id", "Domain id"),
                &["domain", "read"],
            ),
            ToolDefinition::new(
                "verify_domain",
                "Trigger DNS verification of a domain",
                id_schema("domain_id", "Domain id"),
                &["domain", "verify"],
            ),
            ToolDefinition::new(
                "update_domain_settings",
                "Change open tracking, click tracking or TLS mode of a domain",
                json!({
                    "type": "object",
                    "properties": {
                        "domain_id": { "type": "string" },
                        "open_tracking": { "type": "boolean" },
                        "click_tracking": { "type": "boolean" },
                        "tls": { "type": "string", "enum": ["opportunistic", "enforced"] }
                    },
                    "required": ["domain_id"]
                }),
                &["domain", "update"],
            ),
            ToolDefinition::new(
                "remove_domain",
                "Permanently delete a domain",
                id_schema("domain_id", "Domain id"),
                &["domain", "delete"],
            ),
            ToolDefinition::new(
                "list_audiences",
                "List the contact audiences of the account",
                empty_schema(),
                &["audience", "list"],
            ),
            ToolDefinition::new(
                "create_audience",
                "Create a contact audience",
                id_schema("name", "Audience name"),
                &["audience", "create"],
            ),
            ToolDefinition::new(
                "create_contact",
                "Add a contact to an audience",
                json!({
                    "type": "object",
                    "properties": {
                        "audience_id": { "type": "string" },
                        "email": { "type": "string" },
                        "first_name": { "type": "string" },
                        "last_name": { "type": "string" },
                        "unsubscribed": { "type": "boolean", "default": false }
                    },
                    "required": ["audience_id", "email"]
                }),
                &["contact", "create", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "list_contacts",
                "List the contacts of an audience",
                id_schema("audience_id", "Audience id"),
                &["contact", "list"],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "send_email" => self.tool_send_email(params).await,
            "send_batch_emails" => self.tool_send_batch_emails(params).await,
            "retrieve_email_by_id" => self.tool_retrieve_email_by_id(params).await,
            "reschedule_email" => self.tool_reschedule_email(params).await,
            "cancel_scheduled_email" => self.tool_cancel_scheduled_email(params).await,
            "list_domains" => self.client().await?.get("domains").await,
            "create_domain" => self.tool_create_domain(params).await,
            "get_domain" | "verify_domain" | "remove_domain" => {
                self.domain_call(name, &params).await
            }
            "update_domain_settings" => self.tool_update_domain_settings(params).await,
            "list_audiences" => self.client().await?.get("audiences").await,
            "create_audience" => self.tool_create_audience(params).await,
            "create_contact" => self.tool_create_contact(params).await,
            "list_contacts" => self.tool_list_contacts(params).await,
            _ => Err(unknown_tool(self.name(), name)),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("resend", &["api_key"]))
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

    fn app(server: &MockServer) -> ResendApp {
        ResendApp::new(Some(StaticIntegration::shared("resend", &[("API_KEY", "re_123")])))
            .with_base_url(&server.base_url())
    }

    #[tokio::test]
    async fn unknown_domain_tool_sends_nothing() {
        let server = MockServer::start_async().await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/domains/d1");
                then.status(200).json_body(json!({"deleted": true}));
            })
            .await;

        let app = app(&server);
        let err = app
            .domain_call("rename_domain", &json!({"domain_id": "d1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ToolNotFound { .. }));
        delete.assert_hits_async(0).await;

        app.execute_tool("remove_domain", json!({"domain_id": "d1"}))
            .await
            .unwrap();
        delete.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn send_email_posts_with_bearer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/emails")
                    .header("authorization", "Bearer re_123")
                    .json_body(json!({
                        "from": "Ana <ana@example.com>",
                        "to": ["bo@example.com"],
                        "subject": "Hi",
                        "text": "Hello"
                    }));
                then.status(200).json_body(json!({"id": "em_1"}));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "send_email",
                json!({
                    "from_email": "Ana <ana@example.com>",
                    "to_emails": "bo@example.com",
                    "subject": "Hi",
                    "text": "Hello"
                }),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(out["id"], "em_1");
    }

    #[tokio::test]
    async fn send_email_requires_a_body() {
        let server = MockServer::start_async().await;
        let err = app(&server)
            .execute_tool(
                "send_email",
                json!({"from_email": "a@x", "to_emails": ["b@x"], "subject": "s"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`text` or `html`"));
    }

    #[tokio::test]
    async fn batch_size_is_bounded() {
        let server = MockServer::start_async().await;
        let app = app(&server);

        let err = app
            .execute_tool("send_batch_emails", json!({"emails": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidParams { .. }));

        let too_many: Vec<Value> = (0..101).map(|i| json!({"subject": i})).collect();
        let err = app
            .execute_tool("send_batch_emails", json!({"emails": too_many}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("between 1 and 100"));
    }

    #[tokio::test]
    async fn batch_is_posted_as_array() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/emails/batch")
                    .json_body(json!([{"subject": "a"}, {"subject": "b"}]));
                then.status(200).json_body(json!({"data": [{"id": "1"}, {"id": "2"}]}));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "send_batch_emails",
                json!({"emails": [{"subject": "a"}, {"subject": "b"}]}),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(out["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn domain_lifecycle_paths() {
        let server = MockServer::start_async().await;
        let get = server
            .mock_async(|when, then| {
                when.method(GET).path("/domains/d1");
                then.status(200).json_body(json!({"id": "d1", "status": "pending"}));
            })
            .await;
        let verify = server
            .mock_async(|when, then| {
                when.method(POST).path("/domains/d1/verify");
                then.status(200).json_body(json!({"object": "domain", "id": "d1"}));
            })
            .await;
        let remove = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/domains/d1");
                then.status(200).json_body(json!({"deleted": true}));
            })
            .await;

        let app = app(&server);
        for tool in ["get_domain", "verify_domain", "remove_domain"] {
            app.execute_tool(tool, json!({"domain_id": "d1"}))
                .await
                .unwrap();
        }
        get.assert_async().await;
        verify.assert_async().await;
        remove.assert_async().await;
    }

    #[tokio::test]
    async fn create_contact_defaults_unsubscribed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/audiences/aud1/contacts")
                    .json_body(json!({"email": "c@x", "first_name": "Cy", "unsubscribed": false}));
                then.status(201).json_body(json!({"object": "contact", "id": "c1"}));
            })
            .await;

        app(&server)
            .execute_tool(
                "create_contact",
                json!({
                    "audience_id": "aud1",
                    "email": "c@x",
                    "first_name": "Cy",
                    "last_name": null
                }),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_key_is_not_authorized() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/domains");
                then.status(401)
                    .json_body(json!({"name": "validation_error", "message": "API key is invalid"}));
            })
            .await;

        let err = app(&server)
            .execute_tool("list_domains", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
        assert!(err.to_string().contains("API key is invalid"));
    }

    #[tokio::test]
    async fn ids_with_slashes_are_rejected() {
        let server = MockServer::start_async().await;
        let err = app(&server)
            .execute_tool("retrieve_email_by_id", json!({"email_id": "../x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidParams { .. }));
    }
}
