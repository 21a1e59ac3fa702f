//! Catalog configuration.
//!
//! Loaded from an optional TOML file (`config/appcatalog.toml` by default):
//!
//! ```toml
//! [http]
//! timeout_seconds = 30
//! user_agent = "appcatalog/0.1"
//! max_retries = 2
//!
//! [credentials.airtable]
//! api_key = "pat..."
//! ```
//!
//! A missing file yields the defaults.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/appcatalog.toml";

/// Settings applied to every [`crate::http::ApiClient`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Extra attempts after the first for transient failures.
    pub max_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            user_agent: format!("appcatalog/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 0,
        }
    }
}

impl HttpSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            RetryPolicy::none()
        } else {
            RetryPolicy::with_retries(self.max_retries)
        }
    }
}

/// The whole config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub http: HttpSettings,
    /// Raw `[credentials.*]` tables, consumed by
    /// [`crate::integration::credentials_from_toml`].
    pub credentials: toml::Table,
}

impl CatalogConfig {
    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("invalid config: {e}")))
    }

    /// Load config from `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!(path = %path.display(), "loading config");
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file absent, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The credentials table wrapped so it can be fed to
    /// [`crate::integration::credentials_from_toml`].
    pub fn credentials_root(&self) -> toml::Table {
        let mut root = toml::Table::new();
        root.insert(
            "credentials".to_string(),
            toml::Value::Table(self.credentials.clone()),
        );
        root
    }
}
