//! Integration tests for the appcatalog-core crate.
//!
//! A small application is assembled from the public building blocks
//! (credential cell, API client, registry) and driven against a local mock
//! server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use appcatalog_core::{
    ApiClient, AppCategory, AppError, AppRegistry, Application, AuthRequirement, AuthScheme,
    CredentialCell, Credentials, HealthStatus, Integration, Result, ToolDefinition, ToolOutcome,
};
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::{Value, json};

/// Integration that counts how often it is asked for credentials.
struct CountingIntegration {
    calls: AtomicUsize,
}

#[async_trait]
impl Integration for CountingIntegration {
    fn name(&self) -> &str {
        "notes"
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Hold the fetch open so concurrent callers overlap.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Credentials::from_pairs(&[("api_key", "secret")]))
    }
}

struct NotesApp {
    base_url: String,
    client: CredentialCell<ApiClient>,
}

impl NotesApp {
    async fn client(&self) -> Result<&ApiClient> {
        self.client
            .get_or_resolve(|app, creds| {
                let key = creds.require(app, "API key", &["api_key"])?;
                Ok(ApiClient::new(app, &self.base_url)?.with_auth(AuthScheme::Bearer(key)))
            })
            .await
    }
}

#[async_trait]
impl Application for NotesApp {
    fn name(&self) -> &str {
        "notes"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Productivity
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "get_note",
            "Fetch a note",
            json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
            &["note"],
        )]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "get_note" => {
                let id = appcatalog_core::options::require_str(&params, "id", name)?;
                self.client().await?.get(&format!("notes/{id}")).await
            }
            _ => Err(AppError::ToolNotFound {
                app: "notes".into(),
                tool: name.into(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("notes", &["api_key"]))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        self.client().await.map(|_| HealthStatus::Healthy)
    }
}

#[tokio::test]
async fn credentials_resolve_once_across_calls() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/notes/n1")
                .header("authorization", "Bearer secret");
            then.status(200).json_body(json!({"id": "n1", "text": "hi"}));
        })
        .await;

    let integration = Arc::new(CountingIntegration {
        calls: AtomicUsize::new(0),
    });
    let app = NotesApp {
        base_url: server.base_url(),
        client: CredentialCell::new("notes", Some(integration.clone() as Arc<dyn Integration>)),
    };

    let registry = AppRegistry::new();
    registry.register(Arc::new(app));

    for _ in 0..2 {
        let note = registry
            .call_qualified("notes__get_note", json!({"id": "n1"}))
            .await
            .unwrap();
        assert_eq!(note["text"], "hi");
    }

    mock.assert_hits_async(2).await;
    assert_eq!(integration.calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.all_tools()[0].name, "notes__get_note");
}

#[tokio::test]
async fn concurrent_first_calls_fetch_credentials_once() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/notes/n2");
            then.status(200).json_body(json!({"id": "n2", "text": "both"}));
        })
        .await;

    let integration = Arc::new(CountingIntegration {
        calls: AtomicUsize::new(0),
    });
    let app = NotesApp {
        base_url: server.base_url(),
        client: CredentialCell::new("notes", Some(integration.clone() as Arc<dyn Integration>)),
    };

    let (first, second) = tokio::join!(
        app.execute_tool("get_note", json!({"id": "n2"})),
        app.execute_tool("get_note", json!({"id": "n2"})),
    );

    assert_eq!(first.unwrap()["text"], "both");
    assert_eq!(second.unwrap()["text"], "both");
    mock.assert_hits_async(2).await;
    assert_eq!(integration.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn vendor_errors_become_descriptive_outcomes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/notes/gone");
            then.status(404).json_body(json!({"error": {"message": "no such note"}}));
        })
        .await;

    let app = NotesApp {
        base_url: server.base_url(),
        client: CredentialCell::new(
            "notes",
            Some(Arc::new(CountingIntegration {
                calls: AtomicUsize::new(0),
            }) as Arc<dyn Integration>),
        ),
    };
    let registry = AppRegistry::new();
    registry.register(Arc::new(app));

    let outcome = registry
        .call_outcome("notes", "get_note", json!({"id": "gone"}))
        .await;
    assert_eq!(
        outcome,
        ToolOutcome::Error(
            "Error calling notes.get_note: NotFound - resource not found: no such note".into()
        )
    );
}
