//! Core plumbing for appcatalog applications.
//!
//! Every application in the catalog follows the same pattern: resolve
//! credentials lazily from an [`Integration`], build an authenticated client
//! once, flatten and validate the caller's options, dispatch one HTTP call,
//! and normalise the result.  This crate provides each of those steps:
//!
//! - [`traits`] -- the [`Application`] trait and tool definitions.
//! - [`integration`] -- credential sources and the lazy [`CredentialCell`].
//! - [`options`] -- argument flattening and typed getters.
//! - [`http`] / [`graphql`] -- the authenticated vendor clients.
//! - [`response`] -- response normalisation and descriptive error strings.
//! - [`retry`] -- exponential backoff for transient failures.
//! - [`registry`] -- the application registry agents call through.
//! - [`conformance`] -- structural checks for applications.
//! - [`config`] -- TOML configuration.

pub mod config;
pub mod conformance;
pub mod error;
pub mod graphql;
pub mod http;
pub mod integration;
pub mod options;
pub mod registry;
pub mod response;
pub mod retry;
pub mod traits;

pub use config::{CatalogConfig, HttpSettings};
pub use conformance::check_application;
pub use error::{AppError, Result};
pub use graphql::GraphQlClient;
pub use http::{ApiClient, ApiRequest, AuthScheme};
pub use integration::{
    ChainIntegration, CredentialCell, Credentials, EnvIntegration, FileIntegration, Integration,
    StaticIntegration,
};
pub use registry::{AppInfo, AppRegistry};
pub use response::{ToolOutcome, error_string, normalize_response};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use traits::{
    AppCategory, Application, AuthRequirement, HealthStatus, IMPORTANT_TAG, ToolDefinition,
};
