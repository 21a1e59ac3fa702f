//! The appcatalog applications and the slug catalog.
//!
//! Every application implements [`appcatalog_core::Application`].  Use
//! [`app_from_slug`] to build one by name, or [`build_registry`] to get an
//! [`AppRegistry`] holding the whole catalog.

pub mod apps;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use appcatalog_core::{
    AppCategory, AppError, AppRegistry, Application, HttpSettings, Integration, Result,
};

pub use apps::airtable::AirtableApp;
pub use apps::exa::ExaApp;
pub use apps::file_system::FileSystemApp;
pub use apps::hashnode::HashnodeApp;
pub use apps::http_tools::HttpToolsApp;
pub use apps::nocodb::NocodbApp;
pub use apps::perplexity::PerplexityApp;
pub use apps::resend::ResendApp;
pub use apps::twilio::TwilioApp;
pub use apps::zenquotes::ZenquotesApp;

/// Every slug the catalog knows, in display order.
pub const ALL_APPS: &[&str] = &[
    "airtable",
    "exa",
    "file_system",
    "hashnode",
    "http_tools",
    "nocodb",
    "perplexity",
    "resend",
    "twilio",
    "zenquotes",
];

/// Canonical form of a slug: `http-tools` and `HTTP_TOOLS` both become
/// `http_tools`.
pub fn normalize_slug(slug: &str) -> String {
    slug.trim().to_ascii_lowercase().replace('-', "_")
}

/// Build the application for `slug` with default HTTP settings.
pub fn app_from_slug(
    slug: &str,
    integration: Option<Arc<dyn Integration>>,
) -> Result<Box<dyn Application>> {
    app_from_slug_with(slug, integration, &HttpSettings::default())
}

/// Build the application for `slug`, applying `settings` to its HTTP client.
pub fn app_from_slug_with(
    slug: &str,
    integration: Option<Arc<dyn Integration>>,
    settings: &HttpSettings,
) -> Result<Box<dyn Application>> {
    let settings = settings.clone();
    let app: Box<dyn Application> = match normalize_slug(slug).as_str() {
        "airtable" => Box::new(AirtableApp::new(integration).with_settings(settings)),
        "exa" => Box::new(ExaApp::new(integration).with_settings(settings)),
        "file_system" => Box::new(FileSystemApp::new()),
        "hashnode" => Box::new(HashnodeApp::new(integration).with_settings(settings)),
        "http_tools" => Box::new(HttpToolsApp::with_settings(&settings)),
        "nocodb" => Box::new(NocodbApp::new(integration).with_settings(settings)),
        "perplexity" => Box::new(PerplexityApp::new(integration).with_settings(settings)),
        "resend" => Box::new(ResendApp::new(integration).with_settings(settings)),
        "twilio" => Box::new(TwilioApp::new(integration).with_settings(settings)),
        "zenquotes" => Box::new(ZenquotesApp::with_settings(&settings)),
        other => {
            return Err(AppError::Config(format!(
                "unknown application `{other}`; known: {}",
                ALL_APPS.join(", ")
            )));
        }
    };
    debug!(slug = app.name(), "application constructed");
    Ok(app)
}

/// Register every catalog application, asking `integration_for` for each
/// slug's credential source.
pub fn build_registry<F>(integration_for: F, settings: &HttpSettings) -> Result<AppRegistry>
where
    F: Fn(&str) -> Option<Arc<dyn Integration>>,
{
    let registry = AppRegistry::new();
    for slug in ALL_APPS {
        let app = app_from_slug_with(slug, integration_for(slug), settings)?;
        registry.register(Arc::from(app));
    }
    info!(apps = registry.len(), "catalog registry built");
    Ok(registry)
}

/// One line of the catalog listing.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub slug: String,
    pub category: AppCategory,
    pub tool_count: usize,
    pub requires_auth: bool,
}

/// Summaries of every catalog application.  No credentials are resolved.
pub fn catalog() -> Vec<CatalogEntry> {
    ALL_APPS
        .iter()
        .filter_map(|slug| app_from_slug(slug, None).ok())
        .map(|app| CatalogEntry {
            slug: app.name().to_string(),
            category: app.category(),
            tool_count: app.tools().len(),
            requires_auth: app.required_auth().is_some(),
        })
        .collect()
}
