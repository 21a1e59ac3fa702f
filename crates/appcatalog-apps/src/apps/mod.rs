//! The concrete applications.

pub mod airtable;
pub mod exa;
pub mod file_system;
pub mod hashnode;
pub mod http_tools;
pub mod nocodb;
pub mod perplexity;
pub mod resend;
pub mod twilio;
pub mod zenquotes;

use appcatalog_core::{AppError, HealthStatus, Result};

/// Credential keys accepted for a plain API key.
pub(crate) const API_KEY_ALIASES: &[&str] = &["api_key", "API_KEY", "apiKey"];

/// Map a client-resolution result onto a health status.  Missing or
/// rejected credentials are unhealthy; anything else is a real error.
pub(crate) fn health_from<T>(resolved: Result<&T>) -> Result<HealthStatus> {
    match resolved {
        Ok(_) => Ok(HealthStatus::Healthy),
        Err(AppError::NotAuthorized(reason)) => {
            tracing::debug!(%reason, "credentials unavailable");
            Ok(HealthStatus::Unhealthy)
        }
        Err(e) => Err(e),
    }
}

/// A required string argument that is interpolated into a URL path.
pub(crate) fn path_id<'a>(
    params: &'a serde_json::Value,
    field: &str,
    tool: &str,
) -> Result<&'a str> {
    let value = appcatalog_core::options::require_str(params, field, tool)?;
    if value.is_empty() || value.contains(['/', '?', '#']) {
        return Err(AppError::invalid_params(
            tool,
            format!("`{field}` must be a non-empty identifier, got `{value}`"),
        ));
    }
    Ok(value)
}

/// Error for a tool name the application does not know.
pub(crate) fn unknown_tool(app: &str, tool: &str) -> AppError {
    AppError::ToolNotFound {
        app: app.to_string(),
        tool: tool.to_string(),
    }
}
