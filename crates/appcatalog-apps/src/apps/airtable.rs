//! Airtable -- bases, tables and records over the Airtable Web API.
//!
//! Optional knobs (`view`, `max_records`, `formula`, `typecast`, ...) may be
//! sent flat or nested under `"options"`; both forms are accepted.  Listing
//! follows `offset` pagination until the table is exhausted or
//! `max_records` is reached.  Batch writes are split into chunks of
//! [`BATCH_SIZE`], the most the API accepts per request.
//!
//! Agents that want failures as text rather than errors should go through
//! [`AirtableApp::run`], which renders e.g.
//! `Error listing bases: NotAuthorized - ...`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use appcatalog_core::options::{
    flatten_options, optional_bool, optional_str, optional_u64, require_array, require_object,
};
use appcatalog_core::{
    ApiClient, ApiRequest, AppCategory, AppError, Application, AuthRequirement, AuthScheme,
    CredentialCell, HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result,
    ToolDefinition, ToolOutcome,
};

use super::{health_from, path_id, unknown_tool};

const BASE_URL: &str = "https://api.airtable.com/v0";

/// Most records a single write request may carry.
pub const BATCH_SIZE: usize = 10;

/// Credential keys accepted for the personal access token.
const TOKEN_ALIASES: &[&str] = &[
    "api_key",
    "API_KEY",
    "apiKey",
    "access_token",
    "personal_access_token",
];

/// Option name -> query parameter for record reads.
const READ_OPTIONS: &[(&str, &str)] = &[
    ("view", "view"),
    ("page_size", "pageSize"),
    ("formula", "filterByFormula"),
    ("cell_format", "cellFormat"),
    ("time_zone", "timeZone"),
    ("user_locale", "userLocale"),
    ("return_fields_by_field_id", "returnFieldsByFieldId"),
];

pub struct AirtableApp {
    base_url: String,
    settings: HttpSettings,
    client: CredentialCell<ApiClient>,
}

impl AirtableApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            settings: HttpSettings::default(),
            client: CredentialCell::new("airtable", integration),
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
                let key = creds.require(app, "API key", TOKEN_ALIASES)?;
                Ok(ApiClient::with_settings(app, &self.base_url, &self.settings)?
                    .with_auth(AuthScheme::Bearer(key)))
            })
            .await
    }

    /// Run a tool and render any failure as a descriptive error string.
    pub async fn run(&self, tool: &str, params: Value) -> ToolOutcome {
        let context = describe(tool, &params);
        ToolOutcome::from_result(&context, self.execute_tool(tool, params).await)
    }

    // -----------------------------------------------------------------------
    // Bases and tables
    // -----------------------------------------------------------------------

    async fn tool_list_bases(&self) -> Result<Value> {
        let bases = self.paginate("meta/bases", Vec::new(), "bases", None).await?;
        info!(count = bases.len(), "airtable bases listed");
        Ok(Value::Array(bases))
    }

    async fn tool_list_tables(&self, params: &Value) -> Result<Value> {
        let base = path_id(params, "base_id", "list_tables")?;
        let response = self
            .client()
            .await?
            .get(&format!("meta/bases/{base}/tables"))
            .await?;
        Ok(response.get("tables").cloned().unwrap_or_else(|| json!([])))
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    async fn tool_get_record(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "get_record")?;
        let record = path_id(params, "record_id", "get_record")?;
        self.client()
            .await?
            .get_query(&format!("{table}/{record}"), read_query(params))
            .await
    }

    async fn tool_list_records(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "list_records")?;
        let limit = optional_u64(params, "max_records").map(|n| n as usize);

        let mut query = read_query(params);
        if let Some(limit) = limit {
            query.push(("maxRecords".into(), limit.to_string()));
        }
        if let Some(fields) = params.get("fields").and_then(|f| f.as_array()) {
            query.extend(
                fields
                    .iter()
                    .filter_map(|f| f.as_str())
                    .map(|f| ("fields[]".to_string(), f.to_string())),
            );
        }
        query.extend(sort_query(params));

        let records = self.paginate(&table, query, "records", limit).await?;
        debug!(table = %table, count = records.len(), "airtable records listed");
        Ok(Value::Array(records))
    }

    async fn tool_create_record(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "create_record")?;
        let fields = require_object(params, "fields", "create_record")?;
        let mut body = write_flags(params);
        body.insert("fields".into(), Value::Object(fields.clone()));
        self.client()
            .await?
            .post(&table, Value::Object(body))
            .await
    }

    async fn tool_update_record(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "update_record")?;
        let record = path_id(params, "record_id", "update_record")?;
        let fields = require_object(params, "fields", "update_record")?;
        let mut body = write_flags(params);
        body.insert("fields".into(), Value::Object(fields.clone()));
        // PUT clears every field not supplied; PATCH leaves them alone.
        let method = if optional_bool(params, "replace").unwrap_or(false) {
            Method::PUT
        } else {
            Method::PATCH
        };
        let request =
            ApiRequest::new(method, format!("{table}/{record}")).json(Value::Object(body));
        self.client().await?.execute(request).await
    }

    async fn tool_delete_record(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "delete_record")?;
        let record = path_id(params, "record_id", "delete_record")?;
        self.client()
            .await?
            .delete(&format!("{table}/{record}"))
            .await
    }

    async fn tool_batch_create_records(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "batch_create_records")?;
        let records = require_array(params, "records", "batch_create_records")?;
        let items = records
            .iter()
            .map(|r| {
                // Accept bare field maps as well as `{fields: {...}}`.
                let fields = r.get("fields").cloned().unwrap_or_else(|| r.clone());
                json!({ "fields": fields })
            })
            .collect::<Vec<_>>();
        let created = self
            .write_chunks(Method::POST, &table, &items, write_flags(params))
            .await?;
        Ok(Value::Array(created))
    }

    async fn tool_batch_update_records(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "batch_update_records")?;
        let records = require_array(params, "records", "batch_update_records")?;
        if records.iter().any(|r| r.get("id").and_then(|i| i.as_str()).is_none()) {
            return Err(AppError::invalid_params(
                "batch_update_records",
                "every record needs an `id` and `fields`",
            ));
        }
        let method = if optional_bool(params, "replace").unwrap_or(false) {
            Method::PUT
        } else {
            Method::PATCH
        };
        let updated = self
            .write_chunks(method, &table, records, write_flags(params))
            .await?;
        Ok(Value::Array(updated))
    }

    async fn tool_batch_upsert_records(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "batch_upsert_records")?;
        let records = require_array(params, "records", "batch_upsert_records")?;
        let key_fields = require_array(params, "key_fields", "batch_upsert_records")?;
        let mut flags = write_flags(params);
        flags.insert(
            "performUpsert".into(),
            json!({ "fieldsToMergeOn": key_fields }),
        );
        let method = if optional_bool(params, "replace").unwrap_or(false) {
            Method::PUT
        } else {
            Method::PATCH
        };

        let client = self.client().await?;
        let mut result = json!({ "createdRecords": [], "updatedRecords": [], "records": [] });
        for chunk in records.chunks(BATCH_SIZE) {
            let mut body = flags.clone();
            body.insert("records".into(), Value::Array(chunk.to_vec()));
            let response = client
                .execute(ApiRequest::new(method.clone(), table.as_str()).json(Value::Object(body)))
                .await?;
            for key in ["createdRecords", "updatedRecords", "records"] {
                if let (Some(acc), Some(items)) = (
                    result[key].as_array_mut(),
                    response.get(key).and_then(|v| v.as_array()),
                ) {
                    acc.extend(items.iter().cloned());
                }
            }
        }
        Ok(result)
    }

    async fn tool_batch_delete_records(&self, params: &Value) -> Result<Value> {
        let table = table_path(params, "batch_delete_records")?;
        let ids: Vec<String> = require_array(params, "record_ids", "batch_delete_records")?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let client = self.client().await?;
        let mut deleted = Vec::new();
        for chunk in ids.chunks(BATCH_SIZE) {
            let query: Vec<(String, String)> = chunk
                .iter()
                .map(|id| ("records[]".to_string(), id.clone()))
                .collect();
            let response = client
                .execute(ApiRequest::new(Method::DELETE, table.as_str()).queries(query))
                .await?;
            if let Some(records) = response.get("records").and_then(|r| r.as_array()) {
                deleted.extend(records.iter().cloned());
            }
        }
        Ok(Value::Array(deleted))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// GET `path` repeatedly, following `offset`, collecting `key` arrays.
    async fn paginate(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        key: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let client = self.client().await?;
        let mut collected = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut page_query = query.clone();
            if let Some(offset) = &offset {
                page_query.push(("offset".into(), offset.clone()));
            }
            let page = client.get_query(path, page_query).await?;
            if let Some(items) = page.get(key).and_then(|v| v.as_array()) {
                collected.extend(items.iter().cloned());
            }
            if let Some(limit) = limit
                && collected.len() >= limit
            {
                collected.truncate(limit);
                break;
            }
            match page.get("offset").and_then(|o| o.as_str()) {
                Some(next) if !next.is_empty() => offset = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(collected)
    }

    /// Send `items` in chunks, each chunk as `{records: [...], ..flags}`,
    /// and concatenate the returned records.
    async fn write_chunks(
        &self,
        method: Method,
        table: &str,
        items: &[Value],
        flags: Map<String, Value>,
    ) -> Result<Vec<Value>> {
        let client = self.client().await?;
        let mut written = Vec::with_capacity(items.len());
        for (index, chunk) in items.chunks(BATCH_SIZE).enumerate() {
            debug!(table, chunk = index, size = chunk.len(), "airtable batch write");
            let mut body = flags.clone();
            body.insert("records".into(), Value::Array(chunk.to_vec()));
            let response = client
                .execute(ApiRequest::new(method.clone(), table).json(Value::Object(body)))
                .await?;
            if let Some(records) = response.get("records").and_then(|r| r.as_array()) {
                written.extend(records.iter().cloned());
            }
        }
        Ok(written)
    }
}

/// `{base_id}/{table_id_or_name}`.
fn table_path(params: &Value, tool: &str) -> Result<String> {
    let base = path_id(params, "base_id", tool)?;
    let table = path_id(params, "table_id_or_name", tool)?;
    Ok(format!("{base}/{table}"))
}

fn read_query(params: &Value) -> Vec<(String, String)> {
    READ_OPTIONS
        .iter()
        .filter_map(|(option, query)| {
            let value = match params.get(*option)? {
                Value::String(s) if s.is_empty() => return None,
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((query.to_string(), value))
        })
        .collect()
}

/// `sort: ["Name", "-Created"]` -> `sort[0][field]=Name&sort[1][field]=Created&sort[1][direction]=desc`.
fn sort_query(params: &Value) -> Vec<(String, String)> {
    let Some(sort) = params.get("sort").and_then(|s| s.as_array()) else {
        return Vec::new();
    };
    sort.iter()
        .filter_map(|s| s.as_str())
        .enumerate()
        .flat_map(|(i, spec)| {
            let (field, direction) = match spec.strip_prefix('-') {
                Some(field) => (field, "desc"),
                None => (spec, "asc"),
            };
            [
                (format!("sort[{i}][field]"), field.to_string()),
                (format!("sort[{i}][direction]"), direction.to_string()),
            ]
        })
        .collect()
}

/// The `typecast` / `returnFieldsByFieldId` flags shared by every write.
fn write_flags(params: &Value) -> Map<String, Value> {
    let mut flags = Map::new();
    if optional_bool(params, "typecast").unwrap_or(false) {
        flags.insert("typecast".into(), Value::Bool(true));
    }
    if let Some(by_id) = optional_bool(params, "use_field_ids") {
        flags.insert("returnFieldsByFieldId".into(), Value::Bool(by_id));
    }
    flags
}

/// Human description of a call, used as the error-string context.
fn describe(tool: &str, params: &Value) -> String {
    let params = flatten_options(params.clone());
    let arg = |field: &str| optional_str(&params, field).unwrap_or("?").to_string();
    let (base, table, record) = (arg("base_id"), arg("table_id_or_name"), arg("record_id"));
    match tool {
        "list_bases" => "listing bases".to_string(),
        "list_tables" => format!("listing tables for base '{base}'"),
        "get_record" => format!("getting record '{record}' from '{table}' in '{base}'"),
        "list_records" => format!("listing records from '{table}' in '{base}'"),
        "create_record" => format!("creating record in '{table}' in '{base}'"),
        "update_record" => format!("updating record '{record}' in '{table}' in '{base}'"),
        "delete_record" => format!("deleting record '{record}' from '{table}' in '{base}'"),
        "batch_create_records" => format!("batch creating records in '{table}' in '{base}'"),
        "batch_update_records" => format!("batch updating records in '{table}' in '{base}'"),
        "batch_upsert_records" => format!("batch upserting records in '{table}' in '{base}'"),
        "batch_delete_records" => format!("batch deleting records from '{table}' in '{base}'"),
        other => format!("running '{other}'"),
    }
}

fn table_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "base_id": { "type": "string", "description": "Base id (`app...`)" },
        "table_id_or_name": { "type": "string", "description": "Table id (`tbl...`) or name" }
    });
    if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        props.extend(extra);
    }
    let mut req = vec!["base_id", "table_id_or_name"];
    req.extend_from_slice(required);
    json!({ "type": "object", "properties": properties, "required": req })
}

fn write_option_props() -> Value {
    json!({
        "typecast": { "type": "boolean", "description": "Convert string values to the field types" },
        "use_field_ids": { "type": "boolean", "description": "Key returned fields by field id" }
    })
}

fn merged(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Value::Object(a)
        }
        (a, _) => a,
    }
}

#[async_trait]
impl Application for AirtableApp {
    fn name(&self) -> &str {
        "airtable"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Data
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let read_props = json!({
            "cell_format": { "type": "string", "enum": ["json", "string"] },
            "time_zone": { "type": "string" },
            "user_locale": { "type": "string" },
            "return_fields_by_field_id": { "type": "boolean" },
            "options": { "type": "object", "description": "The optional arguments, nested" }
        });
        vec![
            ToolDefinition::new(
                "list_bases",
                "List every base the access token can see",
                json!({ "type": "object", "properties": {} }),
                &["list", "base", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "list_tables",
                "List the tables of a base, with their fields and views",
                json!({
                    "type": "object",
                    "properties": { "base_id": { "type": "string" } },
                    "required": ["base_id"]
                }),
                &["list", "table", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "get_record",
                "Fetch one record by id",
                table_schema(
                    merged(json!({ "record_id": { "type": "string" } }), read_props.clone()),
                    &["record_id"],
                ),
                &["get", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "list_records",
                "List the records of a table, following pagination",
                table_schema(
                    merged(
                        json!({
                            "view": { "type": "string" },
                            "max_records": { "type": "integer" },
                            "page_size": { "type": "integer", "maximum": 100 },
                            "formula": { "type": "string", "description": "filterByFormula expression" },
                            "fields": { "type": "array", "items": { "type": "string" } },
                            "sort": { "type": "array", "items": { "type": "string" }, "description": "Field names; prefix with `-` for descending" }
                        }),
                        read_props,
                    ),
                    &[],
                ),
                &["list", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "create_record",
                "Create one record",
                table_schema(
                    merged(json!({ "fields": { "type": "object" } }), write_option_props()),
                    &["fields"],
                ),
                &["create", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "update_record",
                "Update the given fields of one record (or replace all of them with `replace`)",
                table_schema(
                    merged(
                        json!({
                            "record_id": { "type": "string" },
                            "fields": { "type": "object" },
                            "replace": { "type": "boolean" }
                        }),
                        write_option_props(),
                    ),
                    &["record_id", "fields"],
                ),
                &["update", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "delete_record",
                "Delete one record",
                table_schema(json!({ "record_id": { "type": "string" } }), &["record_id"]),
                &["delete", "record", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "batch_create_records",
                "Create many records; requests are split into chunks of 10",
                table_schema(
                    merged(
                        json!({ "records": { "type": "array", "items": { "type": "object" }, "description": "Field maps" } }),
                        write_option_props(),
                    ),
                    &["records"],
                ),
                &["create", "record", "batch"],
            ),
            ToolDefinition::new(
                "batch_update_records",
                "Update many records given as `{id, fields}`; chunks of 10",
                table_schema(
                    merged(
                        json!({
                            "records": { "type": "array", "items": { "type": "object" } },
                            "replace": { "type": "boolean" }
                        }),
                        write_option_props(),
                    ),
                    &["records"],
                ),
                &["update", "record", "batch"],
            ),
            ToolDefinition::new(
                "batch_upsert_records",
                "Create or update many records, matching existing ones on `key_fields`",
                table_schema(
                    merged(
                        json!({
                            "records": { "type": "array", "items": { "type": "object" } },
                            "key_fields": { "type": "array", "items": { "type": "string" } },
                            "replace": { "type": "boolean" }
                        }),
                        write_option_props(),
                    ),
                    &["records", "key_fields"],
                ),
                &["create", "update", "record", "batch", "upsert"],
            ),
            ToolDefinition::new(
                "batch_delete_records",
                "Delete many records by id; chunks of 10",
                table_schema(
                    json!({ "record_ids": { "type": "array", "items": { "type": "string" } } }),
                    &["record_ids"],
                ),
                &["delete", "record", "batch"],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        let params = flatten_options(params);
        match name {
            "list_bases" => self.tool_list_bases().await,
            "list_tables" => self.tool_list_tables(&params).await,
            "get_record" => self.tool_get_record(&params).await,
            "list_records" => self.tool_list_records(&params).await,
            "create_record" => self.tool_create_record(&params).await,
            "update_record" => self.tool_update_record(&params).await,
            "delete_record" => self.tool_delete_record(&params).await,
            "batch_create_records" => self.tool_batch_create_records(&params).await,
            "batch_update_records" => self.tool_batch_update_records(&params).await,
            "batch_upsert_records" => self.tool_batch_upsert_records(&params).await,
            "batch_delete_records" => self.tool_batch_delete_records(&params).await,
            _ => Err(unknown_tool(self.name(), name)),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("airtable", &["api_key"]))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        health_from(self.client().await)
    }
}
