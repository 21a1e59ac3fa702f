//! CLI argument definitions for appcatalog.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use appcatalog_core::config::DEFAULT_CONFIG_PATH;

/// appcatalog -- third-party service APIs exposed as agent tools.
#[derive(Parser)]
#[command(
    name = "appcatalog",
    version,
    about = "appcatalog -- third-party service APIs exposed as agent tools",
    long_about = "Lists the applications in the catalog, shows their tools, and calls \
                  tools directly with JSON arguments."
)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the applications with their category and tool count.
    Apps,

    /// List the tools of one application.
    Tools {
        /// Application slug (`http_tools` and `http-tools` both work).
        app: String,

        /// Only show tools carrying this tag.
        #[arg(long)]
        tag: Option<String>,

        /// Print full tool definitions as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Call a tool and print its JSON result.
    Call {
        /// Application slug.
        app: String,

        /// Tool name.
        tool: String,

        /// Tool arguments as a JSON object.
        #[arg(long, conflicts_with = "params_file")]
        params: Option<String>,

        /// Read tool arguments from a JSON file.
        #[arg(long)]
        params_file: Option<PathBuf>,

        /// Extra attempts for transient failures of idempotent requests.
        /// Overrides `http.max_retries` from the config.
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Render the tools of an application as a markdown table.
    Docs {
        /// Application slug.
        app: String,
    },

    /// Run the conformance check over every application.
    Check,
}
