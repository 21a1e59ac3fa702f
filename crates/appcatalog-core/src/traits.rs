//! Core application trait and supporting types.
//!
//! Every application (Airtable, Twilio, the local filesystem, ...) implements
//! the [`Application`] trait, giving an agent framework one uniform way to
//! discover tools and invoke them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// The tag that marks a tool as part of an application's default tool set.
pub const IMPORTANT_TAG: &str = "important";

/// The broad category of service an application wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppCategory {
    /// Email, SMS and chat services.
    Messaging,
    /// Publishing, documents and spreadsheets-as-databases.
    Productivity,
    /// Record stores (Airtable, NocoDB, ...).
    Data,
    /// Web search and answer engines.
    Search,
    /// Generic developer utilities (raw HTTP, ...).
    Developer,
    /// Local system resources.
    System,
}

impl std::fmt::Display for AppCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Messaging => write!(f, "messaging"),
            Self::Productivity => write!(f, "productivity"),
            Self::Data => write!(f, "data"),
            Self::Search => write!(f, "search"),
            Self::Developer => write!(f, "developer"),
            Self::System => write!(f, "system"),
        }
    }
}

/// The health status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Credentials resolve and the application is usable.
    Healthy,
    /// Usable, but with reduced capability.
    Degraded,
    /// Not usable (typically: credentials missing).
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A tool exposed by an application that an agent can invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Machine-readable tool name, unique within its application
    /// (e.g. `list_records`, `send_email`).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub parameters: serde_json::Value,
    /// Free-form classification tags (`list`, `record`, `important`, ...).
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ToolDefinition {
    /// Build a tool definition from borrowed parts.
    pub fn new(
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        tags: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Whether this tool carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Credentials an application needs from its integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequirement {
    /// The provider name (usually the application slug).
    pub provider: String,
    /// The canonical credential keys that must resolve.
    pub keys: Vec<String>,
}

impl AuthRequirement {
    pub fn new(provider: &str, keys: &[&str]) -> Self {
        Self {
            provider: provider.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// The universal application interface.
///
/// The agent framework discovers available tools via [`Application::tools`]
/// and runs them via [`Application::execute_tool`].
#[async_trait]
pub trait Application: Send + Sync {
    /// The application slug (e.g. `airtable`, `http_tools`).
    fn name(&self) -> &str;

    /// The category of service this application wraps.
    fn category(&self) -> AppCategory;

    /// Return the list of tools this application exposes.
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool with the given JSON parameters.
    async fn execute_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Return the credential requirements for this application, if any.
    fn required_auth(&self) -> Option<AuthRequirement>;

    /// Check whether the application is usable.
    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }

    /// The tools carrying `tag`.
    fn tools_with_tag(&self, tag: &str) -> Vec<ToolDefinition> {
        self.tools().into_iter().filter(|t| t.has_tag(tag)).collect()
    }
}
