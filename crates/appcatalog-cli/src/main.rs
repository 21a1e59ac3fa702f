//! CLI entry point for appcatalog.
//!
//! This binary provides the `appcatalog` command with subcommands for
//! browsing the catalog, calling tools, and checking applications.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use appcatalog_apps::{ALL_APPS, app_from_slug, app_from_slug_with, catalog};
use appcatalog_core::integration::credentials_from_toml;
use appcatalog_core::{
    Application, CatalogConfig, ChainIntegration, EnvIntegration, HttpSettings, Integration,
    StaticIntegration, ToolOutcome, check_application,
};

use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing `.env` is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    let config = CatalogConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Apps => cmd_apps(),
        Commands::Tools { app, tag, json } => cmd_tools(&app, tag.as_deref(), json),
        Commands::Call {
            app,
            tool,
            params,
            params_file,
            retries,
        } => {
            let params = parse_params(params.as_deref(), params_file.as_deref())?;
            cmd_call(&config, &app, &tool, params, retries).await
        }
        Commands::Docs { app } => cmd_docs(&app),
        Commands::Check => cmd_check(),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: apps
// ---------------------------------------------------------------------------

fn cmd_apps() -> Result<()> {
    println!("{:<14} {:<14} {:>5}  AUTH", "APP", "CATEGORY", "TOOLS");
    for entry in catalog() {
        let category = serde_json::to_value(entry.category)?;
        println!(
            "{:<14} {:<14} {:>5}  {}",
            entry.slug,
            category.as_str().unwrap_or_default(),
            entry.tool_count,
            if entry.requires_auth { "yes" } else { "no" }
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

fn cmd_tools(slug: &str, tag: Option<&str>, json: bool) -> Result<()> {
    let app = app_from_slug(slug, None)?;
    let tools = match tag {
        Some(tag) => app.tools_with_tag(tag),
        None => app.tools(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    for tool in &tools {
        println!("{:<28} {}", tool.name, tool.description);
    }
    if tools.is_empty() {
        println!("(no tools)");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: call
// ---------------------------------------------------------------------------

async fn cmd_call(
    config: &CatalogConfig,
    slug: &str,
    tool: &str,
    params: Value,
    retries: Option<u32>,
) -> Result<()> {
    let integration = integration_for(config, slug)?;
    let settings = http_settings(config, retries);
    let app = app_from_slug_with(slug, Some(integration), &settings)?;
    info!(app = app.name(), tool, retries = settings.max_retries, "calling tool");

    let result = app.execute_tool(tool, params).await;

    match ToolOutcome::from_result(&format!("calling {}.{tool}", app.name()), result) {
        ToolOutcome::Success(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        ToolOutcome::Error(message) => {
            eprintln!("{message}");
            std::process::exit(1);
        }
    }
}

/// HTTP settings from the config, with `--retries` replacing `max_retries`.
/// Retries happen inside the API client, which only repeats idempotent requests.
fn http_settings(config: &CatalogConfig, retries: Option<u32>) -> HttpSettings {
    let mut settings = config.http.clone();
    if let Some(retries) = retries {
        settings.max_retries = retries;
    }
    settings
}

/// Credentials for `slug`: the config file's table first, then
/// `<SLUG>_*` environment variables.
fn integration_for(config: &CatalogConfig, slug: &str) -> Result<Arc<dyn Integration>> {
    let slug = appcatalog_apps::normalize_slug(slug);
    let from_file = credentials_from_toml(&config.credentials_root(), &slug)
        .with_context(|| format!("invalid credentials for `{slug}` in config"))?;
    debug!(app = %slug, file_keys = !from_file.is_empty(), "building integration");

    let sources: Vec<Arc<dyn Integration>> = vec![
        Arc::new(StaticIntegration::new(slug.clone(), from_file)),
        Arc::new(EnvIntegration::new(slug.clone())),
    ];
    Ok(Arc::new(ChainIntegration::new(slug, sources)))
}

/// Tool arguments from `--params` or `--params-file`; `{}` when neither.
fn parse_params(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    let (text, source) = match (inline, file) {
        (Some(text), _) => (text.to_string(), "--params".to_string()),
        (None, Some(path)) => (
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            path.display().to_string(),
        ),
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{source} is not valid JSON"))?;
    if !value.is_object() {
        bail!("{source} must be a JSON object");
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Subcommand: docs
// ---------------------------------------------------------------------------

fn cmd_docs(slug: &str) -> Result<()> {
    let app = app_from_slug(slug, None)?;
    print!("{}", render_docs(app.as_ref()));
    Ok(())
}

/// Markdown page listing every tool of `app`.
fn render_docs(app: &dyn Application) -> String {
    let mut out = format!("# {}\n\n", app.name());
    if let Some(auth) = app.required_auth() {
        out.push_str(&format!(
            "Credentials: `{}` ({})\n\n",
            auth.provider,
            auth.keys.join(", ")
        ));
    }
    out.push_str("| Tool | Description | Tags |\n|---|---|---|\n");
    for tool in app.tools() {
        out.push_str(&format!(
            "| `{}` | {} | {} |\n",
            tool.name,
            escape_cell(&tool.description),
            tool.tags.join(", ")
        ));
    }
    out
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

fn cmd_check() -> Result<()> {
    let mut failures = 0;
    for slug in ALL_APPS {
        let app = app_from_slug(slug, None)?;
        let problems = check_application(app.as_ref(), slug);
        if problems.is_empty() {
            println!("ok    {slug}");
        } else {
            println!("FAIL  {slug}");
            for problem in &problems {
                println!("        {problem}");
            }
            failures += 1;
        }
    }
    if failures > 0 {
        bail!("{failures} application(s) failed the conformance check");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
