//! Application error types.
//!
//! Every application and every core subsystem surfaces errors through
//! [`AppError`].  Variants carry enough context for a caller (or an agent
//! reading the descriptive error string) to tell a credentials problem from
//! a bad argument from a vendor-side failure.

/// Unified error type for appcatalog applications.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Credentials are missing, incomplete, or were rejected by the vendor.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The requested tool does not exist on this application.
    #[error("tool not found: `{tool}` on application `{app}`")]
    ToolNotFound { app: String, tool: String },

    /// The parameters supplied to a tool are invalid.
    #[error("invalid parameters for tool `{tool_name}`: {reason}")]
    InvalidParams { tool_name: String, reason: String },

    /// The vendor reported that the addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The vendor throttled the request.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The vendor API answered with a non-success status.
    #[error("api returned {status}: {message}")]
    Api { status: u16, message: String },

    /// A GraphQL endpoint answered with an `errors` array.
    #[error("graphql error: {0}")]
    GraphQl(String),

    /// An operation exceeded its time limit.
    #[error("timeout after {seconds}s: {reason}")]
    Timeout { seconds: u64, reason: String },

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (bad config file, bad base URL, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for the very common missing/mistyped argument case.
    pub fn invalid_params(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// A short, stable name for the error class, used in descriptive error
    /// strings (`"Error listing bases: NotAuthorized - ..."`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAuthorized(_) => "NotAuthorized",
            Self::ToolNotFound { .. } => "ToolNotFound",
            Self::InvalidParams { .. } => "InvalidParams",
            Self::NotFound(_) => "NotFound",
            Self::RateLimited(_) => "RateLimited",
            Self::Api { .. } => "ApiError",
            Self::GraphQl(_) => "GraphQlError",
            Self::Timeout { .. } => "Timeout",
            Self::Http(_) => "HttpError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Config(_) => "ConfigError",
            Self::Internal(_) => "InternalError",
        }
    }
}

/// Convenience alias used throughout the appcatalog crates.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = AppError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = AppError::Api {
            status: 422,
            message: "bad field".into(),
        };
        assert!(!err.is_transient());
        assert!(!AppError::NotAuthorized("no key".into()).is_transient());
    }

    #[test]
    fn rate_limits_and_timeouts_are_transient() {
        assert!(AppError::RateLimited("slow down".into()).is_transient());
        assert!(
            AppError::Timeout {
                seconds: 30,
                reason: "read".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn invalid_params_display_names_tool_and_reason() {
        let err = AppError::invalid_params("get_record", "missing required string field `base_id`");
        let msg = err.to_string();
        assert!(msg.contains("get_record"));
        assert!(msg.contains("base_id"));
        assert_eq!(err.kind(), "InvalidParams");
    }
}
