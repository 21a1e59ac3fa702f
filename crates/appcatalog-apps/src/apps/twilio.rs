//! Twilio -- SMS/MMS messaging over the 2010-04-01 REST API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use tracing::{debug, info};

use appcatalog_core::options::{optional_str, optional_u64, require_str};
use appcatalog_core::{
    ApiClient, AppCategory, AppError, Application, AuthRequirement, AuthScheme, CredentialCell,
    HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result, ToolDefinition,
};

use super::{health_from, path_id, unknown_tool};

const BASE_URL: &str = "https://api.twilio.com/2010-04-01";
const DEFAULT_LIMIT: u64 = 20;
/// Twilio caps `PageSize` at 1000.
const MAX_PAGE_SIZE: u64 = 1000;

const SID_ALIASES: &[&str] = &["account_sid", "ACCOUNT_SID", "TWILIO_ACCOUNT_SID"];
const TOKEN_ALIASES: &[&str] = &["auth_token", "AUTH_TOKEN", "TWILIO_AUTH_TOKEN"];

/// Fields kept from a Twilio message resource.
const MESSAGE_FIELDS: &[&str] = &[
    "sid",
    "status",
    "body",
    "from",
    "to",
    "date_created",
    "date_sent",
    "date_updated",
    "error_code",
    "error_message",
];

struct TwilioClient {
    http: ApiClient,
    account_sid: String,
}

impl TwilioClient {
    fn messages(&self) -> String {
        format!("Accounts/{}/Messages.json", self.account_sid)
    }

    fn message(&self, sid: &str) -> String {
        format!("Accounts/{}/Messages/{sid}.json", self.account_sid)
    }
}

pub struct TwilioApp {
    base_url: String,
    settings: HttpSettings,
    client: CredentialCell<TwilioClient>,
}

impl TwilioApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            settings: HttpSettings::default(),
            client: CredentialCell::new("twilio", integration),
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

    async fn client(&self) -> Result<&TwilioClient> {
        self.client
            .get_or_resolve(|app, creds| {
                let account_sid = creds.require(app, "account SID", SID_ALIASES)?;
                let auth_token = creds.require(app, "auth token", TOKEN_ALIASES)?;
                let http = ApiClient::with_settings(app, &self.base_url, &self.settings)?
                    .with_auth(AuthScheme::Basic {
                        username: account_sid.clone(),
                        password: auth_token,
                    });
                Ok(TwilioClient { http, account_sid })
            })
            .await
    }

    async fn tool_create_message(&self, params: &Value) -> Result<Value> {
        // `from` is accepted alongside `from_` since the latter only exists to
        // dodge a keyword in some callers.
        let from = optional_str(params, "from_")
            .or_else(|| optional_str(params, "from"))
            .ok_or_else(|| {
                AppError::invalid_params("create_message", "missing required string field `from_`")
            })?;
        let to = require_str(params, "to", "create_message")?;
        let body = require_str(params, "body", "create_message")?;

        let client = self.client().await?;
        let form = vec![
            ("From".to_string(), from.to_string()),
            ("To".to_string(), to.to_string()),
            ("Body".to_string(), body.to_string()),
        ];
        let message = client.http.post_form(&client.messages(), form).await?;
        info!(to, sid = ?message.get("sid"), "twilio message created");
        Ok(reshape(&message))
    }

    async fn tool_fetch_message(&self, params: &Value) -> Result<Value> {
        let sid = path_id(params, "message_sid", "fetch_message")?;
        let client = self.client().await?;
        let message = client.http.get(&client.message(sid)).await?;
        Ok(reshape(&message))
    }

    async fn tool_list_messages(&self, params: &Value) -> Result<Value> {
        let limit = optional_u64(params, "limit").unwrap_or(DEFAULT_LIMIT);
        if limit == 0 {
            return Ok(json!([]));
        }
        let mut query = vec![("PageSize".to_string(), limit.min(MAX_PAGE_SIZE).to_string())];
        if let Some(before) = optional_str(params, "date_sent_before") {
            query.push(("DateSent<".to_string(), twilio_timestamp(before, "date_sent_before")?));
        }
        if let Some(after) = optional_str(params, "date_sent_after") {
            query.push(("DateSent>".to_string(), twilio_timestamp(after, "date_sent_after")?));
        }

        let client = self.client().await?;
        let mut page = client.http.get_query(&client.messages(), query).await?;
        let mut messages: Vec<Value> = Vec::new();
        let mut pages = 1;
        loop {
            let batch = page
                .get("messages")
                .and_then(|m| m.as_array())
                .map(Vec::as_slice)
                .unwrap_or_default();
            messages.extend(batch.iter().map(reshape));
            if batch.is_empty() || messages.len() as u64 >= limit {
                break;
            }
            let Some(next) = next_page_url(client.http.base_url(), &page)? else {
                break;
            };
            page = client.http.get(&next).await?;
            pages += 1;
        }
        messages.truncate(limit as usize);
        debug!(pages, count = messages.len(), "twilio messages listed");
        Ok(Value::Array(messages))
    }

    async fn tool_delete_message(&self, params: &Value) -> Result<Value> {
        let sid = path_id(params, "message_sid", "delete_message")?;
        let client = self.client().await?;
        client.http.delete(&client.message(sid)).await?;
        info!(sid, "twilio message deleted");
        Ok(json!({ "deleted": true, "sid": sid }))
    }
}

/// Absolute URL of the page after `page`, if any.  Twilio reports it as a
/// host-relative `next_page_uri`.
fn next_page_url(base_url: &str, page: &Value) -> Result<Option<String>> {
    let Some(uri) = page
        .get("next_page_uri")
        .and_then(Value::as_str)
        .filter(|uri| !uri.is_empty())
    else {
        return Ok(None);
    };
    let base = url::Url::parse(base_url)
        .map_err(|e| AppError::Internal(format!("invalid twilio base URL `{base_url}`: {e}")))?;
    let next = base
        .join(uri)
        .map_err(|e| AppError::Internal(format!("invalid twilio next_page_uri `{uri}`: {e}")))?;
    Ok(Some(next.to_string()))
}

/// Keep the documented message fields, as `null` when Twilio omits one.
fn reshape(message: &Value) -> Value {
    MESSAGE_FIELDS
        .iter()
        .map(|field| {
            let value = message.get(*field).cloned().unwrap_or(Value::Null);
            (field.to_string(), value)
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// Normalise an RFC 3339 timestamp or a plain `YYYY-MM-DD` date into the UTC
/// form Twilio's date filters accept.
fn twilio_timestamp(raw: &str, field: &str) -> Result<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
        })
        .map_err(|_| {
            AppError::invalid_params(
                "list_messages",
                format!("`{field}` must be an RFC 3339 timestamp or YYYY-MM-DD, got `{raw}`"),
            )
        })?;
    Ok(parsed.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[async_trait]
impl Application for TwilioApp {
    fn name(&self) -> &str {
        "twilio"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Messaging
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let sid_schema = json!({
            "type": "object",
            "properties": {
                "message_sid": { "type": "string", "description": "Message SID, starts with `SM`" }
            },
            "required": ["message_sid"]
        });
        vec![
            ToolDefinition::new(
                "create_message",
                "Send an SMS or MMS message",
                json!({
                    "type": "object",
                    "properties": {
                        "from_": { "type": "string", "description": "Sender number in E.164 format" },
                        "to": { "type": "string", "description": "Recipient number in E.164 format" },
                        "body": { "type": "string" }
                    },
                    "required": ["from_", "to", "body"]
                }),
                &["create", "message", "sms", "send", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "fetch_message",
                "Fetch one message by SID",
                sid_schema.clone(),
                &["fetch", "message", "read", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "list_messages",
                "List recent messages, optionally filtered by send date",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "default": DEFAULT_LIMIT },
                        "date_sent_before": { "type": "string", "description": "RFC 3339 timestamp or YYYY-MM-DD" },
                        "date_sent_after": { "type": "string", "description": "RFC 3339 timestamp or YYYY-MM-DD" }
                    }
                }),
                &["list", "message", "read", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "delete_message",
                "Delete a message from the account",
                sid_schema,
                &["delete", "message", IMPORTANT_TAG],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "create_message" => self.tool_create_message(&params).await,
            "fetch_message" => self.tool_fetch_message(&params).await,
            "list_messages" => self.tool_list_messages(&params).await,
            "delete_message" => self.tool_delete_message(&params).await,
            _ => Err(unknown_tool(self.name(), name)),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("twilio", &["account_sid", "auth_token"]))
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

    fn app(server: &MockServer) -> TwilioApp {
        let integration = StaticIntegration::shared(
            "twilio",
            &[("TWILIO_ACCOUNT_SID", "AC1"), ("auth_token", "secret")],
        );
        TwilioApp::new(Some(integration)).with_base_url(&server.base_url())
    }

    fn message(sid: &str) -> Value {
        json!({
            "sid": sid,
            "status": "queued",
            "body": "hi",
            "from": "+15550001",
            "to": "+15550002",
            "date_created": "Mon, 01 Jan 2024 00:00:00 +0000",
            "date_sent": null,
            "date_updated": "Mon, 01 Jan 2024 00:00:00 +0000",
            "error_code": null,
            "error_message": null,
            "account_sid": "AC1",
            "uri": "/2010-04-01/Accounts/AC1/Messages/SM1.json"
        })
    }

    #[tokio::test]
    async fn create_message_posts_form_with_basic_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/Accounts/AC1/Messages.json")
                    // base64("AC1:secret")
                    .header("authorization", "Basic QUMxOnNlY3JldA==")
                    .body_contains("From=%2B15550001")
                    .body_contains("To=%2B15550002")
                    .body_contains("Body=hi");
                then.status(201).json_body(message("SM1"));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "create_message",
                json!({"from_": "+15550001", "to": "+15550002", "body": "hi"}),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(out["sid"], "SM1");
        assert_eq!(out["from"], "+15550001");
        assert!(out.get("uri").is_none());
        assert_eq!(out.as_object().unwrap().len(), MESSAGE_FIELDS.len());
    }

    #[tokio::test]
    async fn list_messages_applies_limit_and_date_filters() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/Accounts/AC1/Messages.json")
                    .query_param("PageSize", "2")
                    .query_param("DateSent>", "2024-01-01T00:00:00Z");
                then.status(200).json_body(json!({
                    "messages": [message("SM1"), message("SM2"), message("SM3")]
                }));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "list_messages",
                json!({"limit": 2, "date_sent_after": "2024-01-01"}),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        let list = out.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1]["sid"], "SM2");
    }

    #[tokio::test]
    async fn list_messages_follows_next_page_uri() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/Accounts/AC1/Messages.json")
                    .query_param("PageSize", "3")
                    .matches(|req| {
                        !req.query_params
                            .iter()
                            .flatten()
                            .any(|(key, _)| key == "PageToken")
                    });
                then.status(200).json_body(json!({
                    "messages": [message("SM1"), message("SM2")],
                    "next_page_uri": "/Accounts/AC1/Messages.json?Page=1&PageToken=PA2"
                }));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/Accounts/AC1/Messages.json")
                    .query_param("PageToken", "PA2");
                then.status(200).json_body(json!({
                    "messages": [message("SM3"), message("SM4")],
                    "next_page_uri": null
                }));
            })
            .await;

        let out = app(&server)
            .execute_tool("list_messages", json!({"limit": 3}))
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let sids: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["sid"].as_str().unwrap())
            .collect();
        assert_eq!(sids, ["SM1", "SM2", "SM3"]);
    }

    #[tokio::test]
    async fn list_messages_stops_without_next_page() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/Accounts/AC1/Messages.json");
                then.status(200).json_body(json!({
                    "messages": [message("SM1")],
                    "next_page_uri": null
                }));
            })
            .await;

        let out = app(&server)
            .execute_tool("list_messages", json!({"limit": 50}))
            .await
            .unwrap();

        mock.assert_hits_async(1).await;
        assert_eq!(out.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_message_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/Accounts/AC1/Messages.json");
                then.status(503).body("unavailable");
            })
            .await;

        let settings = HttpSettings {
            max_retries: 2,
            ..HttpSettings::default()
        };
        let err = app(&server)
            .with_settings(settings)
            .execute_tool(
                "create_message",
                json!({"from_": "+15550001", "to": "+15550002", "body": "hi"}),
            )
            .await
            .unwrap_err();

        mock.assert_hits_async(1).await;
        assert!(matches!(err, AppError::Api { status: 503, .. }));
    }

    #[test]
    fn next_page_uri_resolves_against_the_host() {
        let page = json!({"next_page_uri": "/2010-04-01/Accounts/AC1/Messages.json?Page=1"});
        assert_eq!(
            next_page_url(BASE_URL, &page).unwrap().as_deref(),
            Some("https://api.twilio.com/2010-04-01/Accounts/AC1/Messages.json?Page=1")
        );
        assert_eq!(next_page_url(BASE_URL, &json!({"next_page_uri": null})).unwrap(), None);
        assert_eq!(next_page_url(BASE_URL, &json!({})).unwrap(), None);
    }

    #[tokio::test]
    async fn delete_message_reports_deleted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/Accounts/AC1/Messages/SM1.json");
                then.status(204);
            })
            .await;

        let out = app(&server)
            .execute_tool("delete_message", json!({"message_sid": "SM1"}))
            .await
            .unwrap();
        assert_eq!(out["deleted"], true);
    }

    #[tokio::test]
    async fn rejected_credentials_are_not_authorized() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/Accounts/AC1/Messages/SM9.json");
                then.status(401)
                    .json_body(json!({"code": 20003, "message": "Authenticate"}));
            })
            .await;

        let err = app(&server)
            .execute_tool("fetch_message", json!({"message_sid": "SM9"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(ref m) if m.contains("Authenticate")));
    }

    #[tokio::test]
    async fn missing_token_is_not_authorized() {
        let app = TwilioApp::new(Some(StaticIntegration::shared(
            "twilio",
            &[("account_sid", "AC1")],
        )));
        assert_eq!(app.health_check().await.unwrap(), HealthStatus::Unhealthy);
        let err = app
            .execute_tool("fetch_message", json!({"message_sid": "SM1"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "not authorized: twilio auth token not found in credentials"
        );
    }

    #[test]
    fn timestamps_normalise_to_utc() {
        assert_eq!(
            twilio_timestamp("2024-03-05T10:00:00+02:00", "x").unwrap(),
            "2024-03-05T08:00:00Z"
        );
        assert_eq!(
            twilio_timestamp("2024-03-05", "x").unwrap(),
            "2024-03-05T00:00:00Z"
        );
        assert!(twilio_timestamp("yesterday", "x").is_err());
    }
}
