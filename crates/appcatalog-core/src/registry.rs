//! Application registry.
//!
//! The registry holds every application an agent may use, flattens their
//! tools into one list with qualified names (`airtable__list_bases`), routes
//! calls back to the owning application, and remembers the last failure per
//! application.
//!
//! Backed by [`DashMap`], so it can be shared across tasks without a global
//! lock.
//!
//! ```rust,ignore
//! let registry = AppRegistry::new();
//! registry.register(Arc::new(ZenquotesApp::new()));
//! let quote = registry.call("zenquotes", "get_random_quote", json!({})).await?;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::response::ToolOutcome;
use crate::traits::{AppCategory, Application, ToolDefinition};

/// Separator between application and tool in qualified tool names.
pub const TOOL_SEPARATOR: &str = "__";

/// Metadata about a registered application.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub category: AppCategory,
    pub tool_count: usize,
    pub registered_at: DateTime<Utc>,
    /// The most recent tool failure, cleared by the next success.
    pub last_error: Option<String>,
}

struct Entry {
    app: Arc<dyn Application>,
    info: AppInfo,
}

/// Concurrent application registry.  Cheap to clone.
#[derive(Clone, Default)]
pub struct AppRegistry {
    inner: Arc<DashMap<String, Entry>>,
}

impl AppRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application under its own name, replacing any previous
    /// application with that name.
    pub fn register(&self, app: Arc<dyn Application>) {
        let name = app.name().to_string();
        let info = AppInfo {
            name: name.clone(),
            category: app.category(),
            tool_count: app.tools().len(),
            registered_at: Utc::now(),
            last_error: None,
        };
        info!(app = %name, tools = info.tool_count, "application registered");
        self.inner.insert(name, Entry { app, info });
    }

    /// Remove an application.  Returns its info if it was registered.
    pub fn unregister(&self, name: &str) -> Option<AppInfo> {
        let removed = self.inner.remove(name).map(|(_, e)| e.info);
        if removed.is_some() {
            info!(app = %name, "application unregistered");
        }
        removed
    }

    /// Look up an application.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Application>> {
        self.inner
            .get(name)
            .map(|e| Arc::clone(&e.app))
            .ok_or_else(|| AppError::Config(format!("application `{name}` is not registered")))
    }

    pub fn info(&self, name: &str) -> Option<AppInfo> {
        self.inner.get(name).map(|e| e.info.clone())
    }

    /// Registered application names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every application's info, sorted by name.
    pub fn list_all(&self) -> Vec<AppInfo> {
        let mut all: Vec<AppInfo> = self.inner.iter().map(|e| e.info.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Every tool of every application, with names qualified as
    /// `<app>__<tool>`.  Sorted by qualified name.
    pub fn all_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .inner
            .iter()
            .flat_map(|e| {
                let app = e.key().clone();
                e.app.tools().into_iter().map(move |mut t| {
                    t.name = qualify(&app, &t.name);
                    t
                })
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Invoke `tool` on application `app`.
    pub async fn call(&self, app: &str, tool: &str, params: Value) -> Result<Value> {
        let application = self.get(app)?;
        debug!(app, tool, "dispatching tool call");
        let result = application.execute_tool(tool, params).await;
        self.record(app, &result);
        result
    }

    /// Invoke a tool by its qualified name.
    pub async fn call_qualified(&self, qualified: &str, params: Value) -> Result<Value> {
        let (app, tool) = split_qualified(qualified).ok_or_else(|| {
            AppError::Config(format!(
                "`{qualified}` is not a qualified tool name (expected `<app>{TOOL_SEPARATOR}<tool>`)"
            ))
        })?;
        self.call(app, tool, params).await
    }

    /// Invoke a tool and collapse the result into a [`ToolOutcome`].
    pub async fn call_outcome(&self, app: &str, tool: &str, params: Value) -> ToolOutcome {
        let context = format!("calling {app}.{tool}");
        ToolOutcome::from_result(&context, self.call(app, tool, params).await)
    }

    fn record(&self, app: &str, result: &Result<Value>) {
        let Some(mut entry) = self.inner.get_mut(app) else {
            return;
        };
        match result {
            Ok(_) => entry.info.last_error = None,
            Err(e) => {
                warn!(app, error = %e, "tool call failed");
                entry.info.last_error = Some(e.to_string());
            }
        }
    }
}

/// `("airtable", "list_bases")` -> `airtable__list_bases`.
pub fn qualify(app: &str, tool: &str) -> String {
    format!("{app}{TOOL_SEPARATOR}{tool}")
}

/// Split a qualified tool name at the first separator.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (app, tool) = name.split_once(TOOL_SEPARATOR)?;
    (!app.is_empty() && !tool.is_empty()).then_some((app, tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AuthRequirement;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fake {
        name: &'static str,
    }

    #[async_trait]
    impl Application for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> AppCategory {
            AppCategory::Developer
        }

        fn tools(&self) -> Vec<ToolDefinition> {
            let empty = json!({"type": "object", "properties": {}});
            vec![
                ToolDefinition::new("ok", "Always succeeds", empty.clone(), &[]),
                ToolDefinition::new("fail", "Always fails", empty, &[]),
            ]
        }

        async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
            match name {
                "ok" => Ok(json!({"echo": params})),
                "fail" => Err(AppError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
                _ => Err(AppError::ToolNotFound {
                    app: self.name.into(),
                    tool: name.into(),
                }),
            }
        }

        fn required_auth(&self) -> Option<AuthRequirement> {
            None
        }
    }

    fn registry() -> AppRegistry {
        let r = AppRegistry::new();
        r.register(Arc::new(Fake { name: "beta" }));
        r.register(Arc::new(Fake { name: "alpha" }));
        r
    }

    #[test]
    fn lists_sorted_names_and_qualified_tools() {
        let r = registry();
        assert_eq!(r.list_names(), vec!["alpha", "beta"]);
        let names: Vec<String> = r.all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["alpha__fail", "alpha__ok", "beta__fail", "beta__ok"]
        );
        assert_eq!(r.info("alpha").unwrap().tool_count, 2);
    }

    #[test]
    fn split_qualified_handles_edge_cases() {
        assert_eq!(split_qualified("airtable__list_bases"), Some(("airtable", "list_bases")));
        assert_eq!(split_qualified("a__b__c"), Some(("a", "b__c")));
        assert_eq!(split_qualified("__tool"), None);
        assert_eq!(split_qualified("plain"), None);
    }

    #[tokio::test]
    async fn call_routes_to_application() {
        let r = registry();
        let out = r.call("alpha", "ok", json!({"x": 1})).await.unwrap();
        assert_eq!(out["echo"]["x"], 1);
        let out = r.call_qualified("beta__ok", json!({})).await.unwrap();
        assert!(out.get("echo").is_some());
    }

    #[tokio::test]
    async fn unknown_application_is_an_error() {
        let err = registry().call("gamma", "ok", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("gamma"));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_cleared() {
        let r = registry();
        assert!(r.call("alpha", "fail", json!({})).await.is_err());
        assert!(r.info("alpha").unwrap().last_error.unwrap().contains("boom"));
        r.call("alpha", "ok", json!({})).await.unwrap();
        assert!(r.info("alpha").unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn call_outcome_renders_error_string() {
        let outcome = registry().call_outcome("alpha", "fail", json!({})).await;
        assert_eq!(
            outcome,
            ToolOutcome::Error("Error calling alpha.fail: ApiError - api returned 500: boom".into())
        );
    }

    #[test]
    fn unregister_removes() {
        let r = registry();
        assert!(r.unregister("alpha").is_some());
        assert!(r.unregister("alpha").is_none());
        assert_eq!(r.len(), 1);
    }
}
