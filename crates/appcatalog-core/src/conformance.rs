//! Structural checks every application must pass.
//!
//! These do not talk to any vendor: they only verify that what an application
//! advertises is something an agent framework can actually consume.

use std::collections::HashSet;

use serde_json::Value;

use crate::traits::Application;

/// Check `app` and return every violation found (empty when conformant).
pub fn check_application(app: &dyn Application, expected_slug: &str) -> Vec<String> {
    let mut problems = Vec::new();

    if app.name() != expected_slug {
        problems.push(format!(
            "application name `{}` does not match slug `{expected_slug}`",
            app.name()
        ));
    }

    let tools = app.tools();
    if tools.is_empty() {
        problems.push("application exposes no tools".to_string());
    }

    let mut seen = HashSet::new();
    for tool in &tools {
        let name = &tool.name;
        if !seen.insert(name.clone()) {
            problems.push(format!("duplicate tool name `{name}`"));
        }
        if !is_identifier(name) {
            problems.push(format!("tool name `{name}` is not a lowercase identifier"));
        }
        if tool.description.trim().is_empty() {
            problems.push(format!("tool `{name}` has an empty description"));
        }
        problems.extend(check_schema(name, &tool.parameters));
    }

    problems
}

fn check_schema(tool: &str, schema: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        problems.push(format!("tool `{tool}` parameters must be an object schema"));
    }
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        problems.push(format!("tool `{tool}` parameters lack `properties`"));
        return problems;
    };
    if let Some(required) = schema.get("required") {
        match required.as_array() {
            Some(required) => {
                for field in required {
                    match field.as_str() {
                        Some(f) if properties.contains_key(f) => {}
                        Some(f) => problems.push(format!(
                            "tool `{tool}` requires `{f}` which is not a declared property"
                        )),
                        None => problems.push(format!(
                            "tool `{tool}` has a non-string entry in `required`"
                        )),
                    }
                }
            }
            None => problems.push(format!("tool `{tool}` `required` must be an array")),
        }
    }
    problems
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::traits::{AppCategory, AuthRequirement, ToolDefinition};
    use async_trait::async_trait;
    use serde_json::json;

    struct Listed(Vec<ToolDefinition>);

    #[async_trait]
    impl Application for Listed {
        fn name(&self) -> &str {
            "listed"
        }

        fn category(&self) -> AppCategory {
            AppCategory::System
        }

        fn tools(&self) -> Vec<ToolDefinition> {
            self.0.clone()
        }

        async fn execute_tool(&self, _name: &str, _params: Value) -> Result<Value> {
            Ok(Value::Null)
        }

        fn required_auth(&self) -> Option<AuthRequirement> {
            None
        }
    }

    fn schema() -> Value {
        json!({"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]})
    }

    #[test]
    fn conformant_application_passes() {
        let app = Listed(vec![ToolDefinition::new("get_a", "Gets a", schema(), &[])]);
        assert!(check_application(&app, "listed").is_empty());
    }

    #[test]
    fn reports_every_violation() {
        let app = Listed(vec![
            ToolDefinition::new(
                "Get-A",
                "",
                json!({"type": "object", "properties": {}, "required": ["x"]}),
                &[],
            ),
            ToolDefinition::new("dup", "d", schema(), &[]),
            ToolDefinition::new("dup", "d", json!({"type": "string"}), &[]),
        ]);
        let problems = check_application(&app, "other");
        let text = problems.join("\n");
        assert!(text.contains("does not match slug"));
        assert!(text.contains("not a lowercase identifier"));
        assert!(text.contains("empty description"));
        assert!(text.contains("`x` which is not a declared property"));
        assert!(text.contains("duplicate tool name `dup`"));
        assert!(text.contains("lack `properties`"));
    }

    #[test]
    fn empty_tool_list_is_a_violation() {
        let problems = check_application(&Listed(vec![]), "listed");
        assert_eq!(problems, vec!["application exposes no tools".to_string()]);
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("http_get"));
        assert!(is_identifier("v2_list"));
        assert!(!is_identifier("2list"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("listBases"));
    }
}
