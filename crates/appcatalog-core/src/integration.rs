//! Integrations: where applications get their credentials from.
//!
//! An application never reads secrets directly.  It holds an optional
//! [`Integration`], asks it for [`Credentials`] the first time a tool needs
//! them, picks the key it wants out of a list of accepted aliases
//! (`api_key` / `API_KEY` / `apiKey`, ...), and caches whatever it built from
//! them in a [`CredentialCell`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A bag of credential values, keyed by whatever names the source used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials(Map<String, Value>);

impl Credentials {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build credentials from string pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw lookup of a single key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Return the first non-empty string value among `aliases`, in order.
    ///
    /// Numbers are accepted and stringified since TOML/JSON sources sometimes
    /// store numeric ids.
    pub fn resolve(&self, aliases: &[&str]) -> Option<String> {
        aliases.iter().find_map(|alias| match self.0.get(*alias)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// Like [`Credentials::resolve`] but fails with `NotAuthorized` naming
    /// the application and the missing piece.
    pub fn require(&self, app: &str, what: &str, aliases: &[&str]) -> Result<String> {
        self.resolve(aliases).ok_or_else(|| {
            AppError::NotAuthorized(format!("{app} {what} not found in credentials"))
        })
    }

    /// Merge `other` underneath `self`: keys already present win.
    fn merge_missing(&mut self, other: Credentials) {
        for (k, v) in other.0 {
            self.0.entry(k).or_insert(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Integration trait
// ---------------------------------------------------------------------------

/// A source of credentials for one application.
#[async_trait]
pub trait Integration: Send + Sync {
    /// The integration name, usually the application slug.
    fn name(&self) -> &str;

    /// Fetch the current credentials.
    async fn get_credentials(&self) -> Result<Credentials>;
}

/// Credentials held in memory.
pub struct StaticIntegration {
    name: String,
    credentials: Credentials,
}

impl StaticIntegration {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            name: name.into(),
            credentials,
        }
    }

    /// Convenience constructor returning the shared handle applications take.
    pub fn shared(name: &str, pairs: &[(&str, &str)]) -> Arc<dyn Integration> {
        Arc::new(Self::new(name, Credentials::from_pairs(pairs)))
    }
}

#[async_trait]
impl Integration for StaticIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Credentials read from `<PREFIX>_<KEY>` environment variables.
///
/// `AIRTABLE_API_KEY=...` yields the credential key `api_key` for the
/// `airtable` integration.  Keys are lowercased.
pub struct EnvIntegration {
    name: String,
    prefix: String,
}

impl EnvIntegration {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = env_prefix(&name);
        Self { name, prefix }
    }

    fn collect<I>(&self, vars: I) -> Credentials
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let map = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let key = k.strip_prefix(&self.prefix)?.to_lowercase();
                (!key.is_empty()).then(|| (key, Value::String(v)))
            })
            .collect();
        Credentials(map)
    }
}

/// `google-docs` -> `GOOGLE_DOCS_`.
pub fn env_prefix(slug: &str) -> String {
    format!("{}_", slug.to_uppercase().replace('-', "_"))
}

#[async_trait]
impl Integration for EnvIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        let creds = self.collect(std::env::vars());
        debug!(integration = %self.name, keys = creds.0.len(), "read credentials from environment");
        Ok(creds)
    }
}

/// Credentials read from the `[credentials.<name>]` table of a TOML file.
///
/// The file is re-read on every call, so edits are picked up without a
/// restart; the applications cache what they build anyway.
pub struct FileIntegration {
    name: String,
    path: PathBuf,
}

impl FileIntegration {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Extract `[credentials.<name>]` from parsed TOML.
pub fn credentials_from_toml(table: &toml::Table, name: &str) -> Result<Credentials> {
    let Some(section) = table
        .get("credentials")
        .and_then(|c| c.as_table())
        .and_then(|c| c.get(name))
    else {
        return Ok(Credentials::default());
    };
    let value = serde_json::to_value(section)?;
    match value {
        Value::Object(map) => Ok(Credentials(map)),
        _ => Err(AppError::Config(format!(
            "credentials for `{name}` must be a table"
        ))),
    }
}

#[async_trait]
impl Integration for FileIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Credentials::default());
            }
            Err(e) => return Err(e.into()),
        };
        let table: toml::Table = content.parse().map_err(|e| {
            AppError::Config(format!("invalid TOML in `{}`: {e}", self.path.display()))
        })?;
        credentials_from_toml(&table, &self.name)
    }
}

/// Merges several integrations; earlier sources win on key conflicts.
pub struct ChainIntegration {
    name: String,
    sources: Vec<Arc<dyn Integration>>,
}

impl ChainIntegration {
    pub fn new(name: impl Into<String>, sources: Vec<Arc<dyn Integration>>) -> Self {
        Self {
            name: name.into(),
            sources,
        }
    }
}

#[async_trait]
impl Integration for ChainIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        let mut merged = Credentials::default();
        for source in &self.sources {
            merged.merge_missing(source.get_credentials().await?);
        }
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Lazy resolution
// ---------------------------------------------------------------------------

/// Resolve-once holder for whatever an application builds from its
/// credentials (an API key, a configured client, ...).
///
/// Concurrent first calls initialise the value exactly once.  Failures are
/// not cached: the next call asks the integration again.
pub struct CredentialCell<T> {
    app: String,
    integration: Option<Arc<dyn Integration>>,
    cell: OnceCell<T>,
}

impl<T> CredentialCell<T> {
    pub fn new(app: impl Into<String>, integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            app: app.into(),
            integration,
            cell: OnceCell::new(),
        }
    }

    pub fn has_integration(&self) -> bool {
        self.integration.is_some()
    }

    /// The cached value, if already resolved.
    pub fn cached(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Return the cached value, building it from fresh credentials on first use.
    pub async fn get_or_resolve<F>(&self, build: F) -> Result<&T>
    where
        F: FnOnce(&str, Credentials) -> Result<T>,
    {
        self.cell
            .get_or_try_init(|| async move {
                let integration = self.integration.as_ref().ok_or_else(|| {
                    AppError::NotAuthorized(format!("{} integration not configured", self.app))
                })?;
                let credentials = integration.get_credentials().await.map_err(|e| {
                    if matches!(e, AppError::NotAuthorized(_)) {
                        e
                    } else {
                        AppError::NotAuthorized(format!(
                            "failed to get {} credentials: {e}",
                            self.app
                        ))
                    }
                })?;
                let value = build(&self.app, credentials)?;
                info!(app = %self.app, "credentials resolved");
                Ok(value)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_takes_first_non_empty_alias() {
        let creds =
            Credentials::from_pairs(&[("api_key", ""), ("API_KEY", "k2"), ("apiKey", "k3")]);
        assert_eq!(creds.resolve(&["api_key", "API_KEY", "apiKey"]), Some("k2".into()));
    }

    #[test]
    fn resolve_stringifies_numbers() {
        let mut map = Map::new();
        map.insert("account".into(), json!(42));
        let creds = Credentials::new(map);
        assert_eq!(creds.resolve(&["account"]), Some("42".into()));
    }

    #[test]
    fn require_names_app_and_missing_piece() {
        let err = Credentials::default()
            .require("resend", "API key", &["api_key"])
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
        assert!(err.to_string().contains("resend API key not found"));
    }

    #[test]
    fn env_prefix_uppercases_and_replaces_dashes() {
        assert_eq!(env_prefix("google-docs"), "GOOGLE_DOCS_");
        assert_eq!(env_prefix("airtable"), "AIRTABLE_");
    }

    #[test]
    fn env_integration_strips_prefix_and_lowercases() {
        let integration = EnvIntegration::new("airtable");
        let creds = integration.collect(vec![
            ("AIRTABLE_API_KEY".to_string(), "pat123".to_string()),
            ("AIRTABLE_".to_string(), "ignored".to_string()),
            ("OTHER_API_KEY".to_string(), "nope".to_string()),
        ]);
        assert_eq!(creds.resolve(&["api_key"]), Some("pat123".into()));
        assert_eq!(creds.0.len(), 1);
    }

    #[test]
    fn credentials_from_toml_reads_named_table() {
        let table: toml::Table = r#"
            [credentials.nocodb]
            api_token = "tok"
            base_id = "p123"
        "#
        .parse()
        .unwrap();
        let creds = credentials_from_toml(&table, "nocodb").unwrap();
        assert_eq!(creds.resolve(&["api_token"]), Some("tok".into()));
        assert!(credentials_from_toml(&table, "airtable").unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_integration_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let integration = FileIntegration::new("exa", dir.path().join("absent.toml"));
        assert!(integration.get_credentials().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_integration_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.toml");
        tokio::fs::write(&path, "[credentials.exa]\napi_key = \"e-1\"\n")
            .await
            .unwrap();
        let integration = FileIntegration::new("exa", &path);
        let creds = integration.get_credentials().await.unwrap();
        assert_eq!(creds.resolve(&["api_key"]), Some("e-1".into()));
    }

    #[tokio::test]
    async fn chain_prefers_earlier_sources() {
        let first = StaticIntegration::shared("x", &[("api_key", "first")]);
        let second = StaticIntegration::shared("x", &[("api_key", "second"), ("region", "eu")]);
        let chain = ChainIntegration::new("x", vec![first, second]);
        let creds = chain.get_credentials().await.unwrap();
        assert_eq!(creds.resolve(&["api_key"]), Some("first".into()));
        assert_eq!(creds.resolve(&["region"]), Some("eu".into()));
    }

    #[tokio::test]
    async fn cell_without_integration_is_not_authorized() {
        let cell: CredentialCell<String> = CredentialCell::new("twilio", None);
        let err = cell
            .get_or_resolve(|app, c| c.require(app, "auth token", &["auth_token"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("twilio integration not configured"));
    }

    #[tokio::test]
    async fn cell_resolves_once_and_caches() {
        let cell = CredentialCell::new(
            "resend",
            Some(StaticIntegration::shared("resend", &[("API_KEY", "re_1")])),
        );
        let first = cell
            .get_or_resolve(|app, c| c.require(app, "API key", &["api_key", "API_KEY"]))
            .await
            .unwrap()
            .clone();
        assert_eq!(first, "re_1");
        // A second builder is never invoked once the value is cached.
        let second = cell
            .get_or_resolve(|_, _| Err(AppError::Internal("should not run".into())))
            .await
            .unwrap();
        assert_eq!(second, "re_1");
        assert_eq!(cell.cached().map(String::as_str), Some("re_1"));
    }

    #[tokio::test]
    async fn cell_does_not_cache_failures() {
        let cell: CredentialCell<String> = CredentialCell::new(
            "exa",
            Some(StaticIntegration::shared("exa", &[])),
        );
        assert!(cell
            .get_or_resolve(|app, c| c.require(app, "API key", &["api_key"]))
            .await
            .is_err());
        let ok = cell
            .get_or_resolve(|_, _| Ok("fallback".to_string()))
            .await
            .unwrap();
        assert_eq!(ok, "fallback");
    }
}
