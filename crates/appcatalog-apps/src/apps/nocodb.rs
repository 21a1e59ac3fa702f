//! NocoDB -- tables, fields and records of one base via the v3 API.
//!
//! Credentials carry the base id and the API token (`xc-token`), and may
//! carry the `base_url` of a self-hosted instance.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, info};

use appcatalog_core::options::{optional_str, optional_u64, require_str};
use appcatalog_core::{
    ApiClient, ApiRequest, AppCategory, AppError, Application, AuthRequirement, AuthScheme,
    CredentialCell, HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result,
    ToolDefinition,
};

use super::{health_from, path_id, unknown_tool};

const DEFAULT_BASE_URL: &str = "https://app.nocodb.com";
const TOKEN_ALIASES: &[&str] = &["api_token", "xc_token", "api_key", "API_KEY", "token"];
const BASE_ID_ALIASES: &[&str] = &["base_id", "BASE_ID", "baseId"];

/// The resolved client plus the base every path is scoped to.
#[derive(Debug)]
struct NocoClient {
    http: ApiClient,
    base_id: String,
}

impl NocoClient {
    fn meta(&self, rest: &str) -> String {
        format!("api/v3/meta/bases/{}/{rest}", self.base_id)
    }

    fn data(&self, table: &str, rest: &str) -> String {
        format!("api/v3/data/{}/{table}/{rest}", self.base_id)
    }
}

pub struct NocodbApp {
    /// Overrides any `base_url` in the credentials.
    base_url: Option<String>,
    settings: HttpSettings,
    client: CredentialCell<NocoClient>,
}

impl NocodbApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            base_url: None,
            settings: HttpSettings::default(),
            client: CredentialCell::new("nocodb", integration),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    pub fn with_settings(mut self, settings: HttpSettings) -> Self {
        self.settings = settings;
        self
    }

    async fn client(&self) -> Result<&NocoClient> {
        self.client
            .get_or_resolve(|app, creds| {
                let token = creds.require(app, "API token", TOKEN_ALIASES)?;
                let base_id = creds.require(app, "base id", BASE_ID_ALIASES)?;
                let base_url = self
                    .base_url
                    .clone()
                    .or_else(|| creds.resolve(&["base_url", "BASE_URL"]))
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
                info!(base_url = %base_url, base_id = %base_id, "nocodb client created");
                let http = ApiClient::with_settings(app, &base_url, &self.settings)?
                    .with_auth(AuthScheme::Header {
                        name: "xc-token".into(),
                        value: token,
                    });
                Ok(NocoClient { http, base_id })
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Meta
    // -----------------------------------------------------------------------

    async fn tool_list_tables(&self, params: &Value) -> Result<Value> {
        let client = self.client().await?;
        let request = ApiRequest::get(client.meta("tables"))
            .query("limit", optional_u64(params, "limit").unwrap_or(50))
            .query("offset", optional_u64(params, "offset").unwrap_or(0));
        client.http.execute(request).await
    }

    async fn tool_create_table(&self, params: &Value) -> Result<Value> {
        let title = require_str(params, "title", "create_table")?;
        let fields: Vec<Value> = params
            .get("columns")
            .and_then(|c| c.as_array())
            .map(|cols| cols.iter().map(column_with_type).collect())
            .unwrap_or_default();
        let body = json!({
            "title": title,
            "table_name": optional_str(params, "table_name").unwrap_or(title),
            "fields": fields,
        });

        let client = self.client().await?;
        let created = client.http.post(&client.meta("tables"), body).await?;
        info!(title, "nocodb table created");
        Ok(created)
    }

    async fn tool_delete_table(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "delete_table")?;
        let client = self.client().await?;
        client
            .http
            .delete(&client.meta(&format!("tables/{table}")))
            .await
    }

    async fn tool_create_column(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "create_column")?;
        let title = require_str(params, "title", "create_column")?;
        let uidt = optional_str(params, "uidt").unwrap_or("SingleLineText");
        let mut body = json!({
            "title": title,
            "column_name": optional_str(params, "column_name").unwrap_or(title),
            "uidt": uidt,
            "type": uidt,
        });
        if let Some(options) = params.get("options").filter(|o| o.is_object()) {
            body["options"] = options.clone();
        }
        let client = self.client().await?;
        client
            .http
            .post(&client.meta(&format!("tables/{table}/fields")), body)
            .await
    }

    async fn tool_delete_column(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "delete_column")?;
        let column = path_id(params, "column_id", "delete_column")?;
        let client = self.client().await?;
        client
            .http
            .delete(&client.meta(&format!("tables/{table}/fields/{column}")))
            .await
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    async fn tool_list_records(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "list_records")?;
        let client = self.client().await?;
        let mut request = ApiRequest::get(client.data(table, "records"))
            .query("limit", optional_u64(params, "limit").unwrap_or(25))
            .query("offset", optional_u64(params, "offset").unwrap_or(0))
            .queries(filter_query(params));
        for field in ["fields", "sort"] {
            if let Some(joined) = joined_list(params, field) {
                request = request.query(field, joined);
            }
        }
        client.http.execute(request).await
    }

    async fn tool_get_record(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "get_record")?;
        let record = path_id(params, "record_id", "get_record")?;
        let client = self.client().await?;
        let mut request = ApiRequest::get(client.data(table, &format!("records/{record}")));
        if let Some(fields) = joined_list(params, "fields") {
            request = request.query("fields", fields);
        }
        client.http.execute(request).await
    }

    async fn tool_create_records(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "create_records")?;
        let (payload, bulk) = match params.get("data") {
            Some(Value::Array(items)) => (
                Value::Array(items.iter().map(wrap_fields).collect()),
                true,
            ),
            Some(item @ Value::Object(_)) => (wrap_fields(item), false),
            _ => {
                return Err(AppError::invalid_params(
                    "create_records",
                    "`data` must be a record object or an array of them",
                ));
            }
        };

        let client = self.client().await?;
        let response = client
            .http
            .post(&client.data(table, "records"), payload)
            .await?;
        Ok(unwrap_records(response, bulk))
    }

    async fn tool_update_records(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "update_records")?;
        let (payload, bulk) = match params.get("data") {
            Some(Value::Array(items)) => (
                Value::Array(
                    items
                        .iter()
                        .map(id_and_fields)
                        .collect::<Result<Vec<_>>>()?,
                ),
                true,
            ),
            Some(item @ Value::Object(_)) => (id_and_fields(item)?, false),
            _ => {
                return Err(AppError::invalid_params(
                    "update_records",
                    "`data` must be a record object or an array of them",
                ));
            }
        };

        let client = self.client().await?;
        let response = client
            .http
            .patch(&client.data(table, "records"), payload)
            .await?;
        if bulk {
            Ok(unwrap_records(response, true))
        } else {
            Ok(response)
        }
    }

    async fn tool_delete_records(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "delete_records")?;
        let ids: Vec<Value> = match params.get("record_ids") {
            Some(Value::Array(items)) => items.iter().filter_map(record_ref).collect(),
            Some(single) => record_ref(single).into_iter().collect(),
            None => Vec::new(),
        };
        if ids.is_empty() {
            return Err(AppError::invalid_params(
                "delete_records",
                "`record_ids` must name at least one record",
            ));
        }
        debug!(table, count = ids.len(), "deleting nocodb records");

        let client = self.client().await?;
        client
            .http
            .delete_with_body(&client.data(table, "records"), Value::Array(ids))
            .await
    }

    async fn tool_get_record_count(&self, params: &Value) -> Result<Value> {
        let table = path_id(params, "table_id", "get_record_count")?;
        let client = self.client().await?;
        let request =
            ApiRequest::new(Method::GET, client.data(table, "count")).queries(filter_query(params));
        client.http.execute(request).await
    }
}

/// Copy `uidt` into `type` when only the former was given.
fn column_with_type(column: &Value) -> Value {
    let mut column = column.clone();
    if let Some(obj) = column.as_object_mut()
        && !obj.contains_key("type")
        && let Some(uidt) = obj.get("uidt").cloned()
    {
        obj.insert("type".into(), uidt);
    }
    column
}

/// `{"Name": "x"}` -> `{"fields": {"Name": "x"}}`; already-wrapped records
/// pass through.
fn wrap_fields(record: &Value) -> Value {
    if record.get("fields").is_some() {
        record.clone()
    } else {
        json!({ "fields": record })
    }
}

/// `{"Id": 3, "Name": "x"}` -> `{"id": 3, "fields": {"Name": "x"}}`.
fn id_and_fields(record: &Value) -> Result<Value> {
    let obj = record.as_object().ok_or_else(|| {
        AppError::invalid_params("update_records", "each record must be an object")
    })?;
    let id = obj
        .get("Id")
        .or_else(|| obj.get("id"))
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| AppError::invalid_params("update_records", "record is missing `Id`/`id`"))?;
    let fields: serde_json::Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| *k != "Id" && *k != "id")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(json!({ "id": id, "fields": fields }))
}

/// A record id given bare (`3`, `"rec"`) or as `{id}` / `{Id}`.
fn record_ref(item: &Value) -> Option<Value> {
    match item {
        Value::Number(_) | Value::String(_) => Some(json!({ "id": item })),
        Value::Object(obj) => obj
            .get("id")
            .or_else(|| obj.get("Id"))
            .map(|id| json!({ "id": id })),
        _ => None,
    }
}

/// Single creates return the one record, bulk creates the list.
fn unwrap_records(response: Value, bulk: bool) -> Value {
    let Some(records) = response.get("records").and_then(|r| r.as_array()) else {
        return response;
    };
    if bulk {
        Value::Array(records.clone())
    } else {
        records.first().cloned().unwrap_or(response)
    }
}

fn filter_query(params: &Value) -> Vec<(String, String)> {
    [("view_id", "viewId"), ("where", "where")]
        .into_iter()
        .filter_map(|(arg, query)| {
            optional_str(params, arg).map(|v| (query.to_string(), v.to_string()))
        })
        .collect()
}

fn joined_list(params: &Value, field: &str) -> Option<String> {
    let items: Vec<&str> = params
        .get(field)?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    (!items.is_empty()).then(|| items.join(","))
}

fn table_id_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = json!({ "table_id": { "type": "string", "description": "Table id" } });
    if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        props.extend(extra);
    }
    let mut req = vec!["table_id"];
    req.extend_from_slice(required);
    json!({ "type": "object", "properties": properties, "required": req })
}

#[async_trait]
impl Application for NocodbApp {
    fn name(&self) -> &str {
        "nocodb"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Data
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let record_data = json!({
            "data": {
                "description": "One record object or an array of them",
                "oneOf": [{ "type": "object" }, { "type": "array", "items": { "type": "object" } }]
            }
        });
        vec![
            ToolDefinition::new(
                "list_tables",
                "List the tables of the configured base",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "default": 50 },
                        "offset": { "type": "integer", "default": 0 }
                    }
                }),
                &["read", "list", "table", "meta", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "create_table",
                "Create a table; each column needs a `title` and a `uidt` such as SingleLineText, Number or SingleSelect",
                json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "table_name": { "type": "string", "description": "Defaults to the title" },
                        "columns": { "type": "array", "items": { "type": "object" } }
                    },
                    "required": ["title"]
                }),
                &["create", "table", "meta", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "delete_table",
                "Delete a table and all its records",
                table_id_schema(json!({}), &[]),
                &["delete", "table", "meta"],
            ),
            ToolDefinition::new(
                "create_column",
                "Add a field to a table",
                table_id_schema(
                    json!({
                        "title": { "type": "string" },
                        "column_name": { "type": "string" },
                        "uidt": { "type": "string", "default": "SingleLineText" },
                        "options": { "type": "object", "description": "Type-specific options, e.g. select choices" }
                    }),
                    &["title"],
                ),
                &["create", "column", "meta"],
            ),
            ToolDefinition::new(
                "delete_column",
                "Remove a field from a table",
                table_id_schema(json!({ "column_id": { "type": "string" } }), &["column_id"]),
                &["delete", "column", "meta"],
            ),
            ToolDefinition::new(
                "list_records",
                "List records with optional view, where filter, field selection and sort",
                table_id_schema(
                    json!({
                        "limit": { "type": "integer", "default": 25 },
                        "offset": { "type": "integer", "default": 0 },
                        "view_id": { "type": "string" },
                        "where": { "type": "string", "description": "e.g. `(Status,eq,Active)`" },
                        "fields": { "type": "array", "items": { "type": "string" } },
                        "sort": { "type": "array", "items": { "type": "string" }, "description": "Field names; prefix with `-` for descending" }
                    }),
                    &[],
                ),
                &["read", "list", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "get_record",
                "Fetch one record",
                table_id_schema(
                    json!({
                        "record_id": { "type": "string" },
                        "fields": { "type": "array", "items": { "type": "string" } }
                    }),
                    &["record_id"],
                ),
                &["read", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "create_records",
                "Create one record (object in, object out) or many (array in, array out)",
                table_id_schema(record_data.clone(), &["data"]),
                &["create", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "update_records",
                "Update one or many records; each carries its `Id` plus the fields to change",
                table_id_schema(record_data, &["data"]),
                &["update", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "delete_records",
                "Delete records given as ids or `{id}` objects",
                table_id_schema(
                    json!({ "record_ids": { "description": "An id, an `{id}` object, or an array of either" } }),
                    &["record_ids"],
                ),
                &["delete", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "get_record_count",
                "Count the records matching an optional view or where filter",
                table_id_schema(
                    json!({
                        "view_id": { "type": "string" },
                        "where": { "type": "string" }
                    }),
                    &[],
                ),
                &["read", "count", "record"],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "list_tables" => self.tool_list_tables(&params).await,
            "create_table" => self.tool_create_table(&params).await,
            "delete_table" => self.tool_delete_table(&params).await,
            "create_column" => self.tool_create_column(&params).await,
            "delete_column" => self.tool_delete_column(&params).await,
            "list_records" => self.tool_list_records(&params).await,
            "get_record" => self.tool_get_record(&params).await,
            "create_records" => self.tool_create_records(&params).await,
            "update_records" => self.tool_update_records(&params).await,
            "delete_records" => self.tool_delete_records(&params).await,
            "get_record_count" => self.tool_get_record_count(&params).await,
            _ => Err(unknown_tool(self.name(), name)),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("nocodb", &["api_token", "base_id"]))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        health_from(self.client().await)
    }
}
