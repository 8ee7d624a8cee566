//! Tool registry: the set of tools offered to the model for a turn.
//!
//! Provides:
//! - Lookup by name and terminal-tool checks
//! - Per-turn narrowing (`without`), e.g. dropping `document_search` in
//!   retrieval mode
//! - Structural validation of a call against the tool's parameter schema
//! - Serialization into the OpenAI `tools` request field

use std::collections::HashMap;

use crate::inference::types::{FunctionDefinition, ToolDefinition};

use super::catalog;
use super::errors::ToolError;
use super::types::ToolSpec;

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Ordered tool set with a name index.
///
/// Order is preserved so the model sees the tools in the same sequence
/// every turn.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in catalog.
    pub fn builtin() -> Self {
        Self::from_specs(catalog::builtin_tools())
    }

    pub fn from_specs(specs: Vec<ToolSpec>) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec);
        }
        registry
    }

    /// Add a tool, replacing any existing tool with the same name in place.
    pub fn register(&mut self, spec: ToolSpec) {
        match self.index.get(&spec.name) {
            Some(&pos) => {
                tracing::debug!(tool = %spec.name, "replacing registered tool");
                self.tools[pos] = spec;
            }
            None => {
                self.index.insert(spec.name.clone(), self.tools.len());
                self.tools.push(spec);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&pos| &self.tools[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Whether a successful call to `name` ends the resolution loop.
    pub fn is_terminal(&self, name: &str) -> bool {
        self.get(name).map(|t| t.terminal).unwrap_or(false)
    }

    /// A copy of this registry without `name`.
    pub fn without(&self, name: &str) -> Self {
        Self::from_specs(
            self.tools
                .iter()
                .filter(|t| t.name != name)
                .cloned()
                .collect(),
        )
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// `- name: description` lines for the system preamble.
    pub fn summary(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Serialize into the `tools` field of a completion request.
    pub fn to_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    // ─── Validation ──────────────────────────────────────────────────────

    /// Check that a call matches the registered schema.
    ///
    /// Structural only: arguments must be an object, required fields must be
    /// present, and top-level primitive types and `enum` values must match.
    /// Anything deeper is left to the provider.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), ToolError> {
        let spec = self.get(tool_name).ok_or_else(|| ToolError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: tool_name.to_string(),
            reason,
        };

        let args = arguments
            .as_object()
            .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;

        if let Some(required) = spec.parameters.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !args.contains_key(field) {
                    return Err(invalid(format!("missing required field: '{field}'")));
                }
            }
        }

        let Some(properties) = spec.parameters.get("properties").and_then(|p| p.as_object())
        else {
            return Ok(());
        };

        for (field, value) in args {
            let Some(prop) = properties.get(field) else {
                continue;
            };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                if !matches_json_type(expected, value) {
                    return Err(invalid(format!(
                        "field '{field}' should be {expected}, got {}",
                        json_type_name(value)
                    )));
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(value) {
                    return Err(invalid(format!(
                        "field '{field}' must be one of {}",
                        serde_json::Value::Array(allowed.clone())
                    )));
                }
            }
        }

        Ok(())
    }
}

fn matches_json_type(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_lookup() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.len(), 10);
        assert!(registry.get(catalog::WEB_SEARCH).is_some());
        assert!(registry.get("nonexistent_tool").is_none());
        assert!(registry.is_terminal(catalog::IMAGE_GENERATE));
        assert!(!registry.is_terminal(catalog::WEB_SEARCH));
        assert!(!registry.is_terminal("nonexistent_tool"));
    }

    #[test]
    fn test_without_removes_only_named_tool() {
        let registry = ToolRegistry::builtin();
        let narrowed = registry.without(catalog::DOCUMENT_SEARCH);
        assert_eq!(narrowed.len(), 9);
        assert!(!narrowed.contains(catalog::DOCUMENT_SEARCH));
        assert!(narrowed.contains(catalog::WEB_SEARCH));
        // Source registry untouched
        assert!(registry.contains(catalog::DOCUMENT_SEARCH));
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = ToolRegistry::builtin();
        let first = registry.tool_names()[0].to_string();
        registry.register(ToolSpec {
            name: first.clone(),
            description: "replaced".into(),
            parameters: json!({"type": "object", "properties": {}}),
            terminal: false,
        });
        assert_eq!(registry.len(), 10);
        assert_eq!(registry.tool_names()[0], first);
        assert_eq!(registry.get(&first).unwrap().description, "replaced");
    }

    #[test]
    fn test_to_tool_definitions_preserves_order() {
        let registry = ToolRegistry::builtin();
        let defs = registry.to_tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(names, registry.tool_names());
        assert!(defs.iter().all(|d| d.r#type == "function"));
    }

    #[test]
    fn test_summary_lists_every_tool() {
        let summary = ToolRegistry::builtin().summary();
        assert!(summary.contains("- web_search: Search the web"));
        assert_eq!(summary.lines().count(), 10);
    }

    #[test]
    fn test_validate_valid_call() {
        let registry = ToolRegistry::builtin();
        let args = json!({"query": "rust async"});
        assert!(registry.validate_tool_call(catalog::WEB_SEARCH, &args).is_ok());
    }

    #[test]
    fn test_validate_unknown_tool() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .validate_tool_call("nonexistent_tool", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
        assert_eq!(err.to_string(), "Unknown tool: nonexistent_tool");
    }

    #[test]
    fn test_validate_missing_required() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .validate_tool_call(catalog::GOOGLE_DOCS_CREATE, &json!({"title": "Notes"}))
            .unwrap_err();
        assert!(err.to_string().contains("missing required field: 'content'"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .validate_tool_call(
                catalog::GOOGLE_GMAIL_LIST_MESSAGES,
                &json!({"maxResults": "five"}),
            )
            .unwrap_err();
        assert!(err.to_string().contains("should be number, got string"));
    }

    #[test]
    fn test_validate_enum() {
        let registry = ToolRegistry::builtin();
        assert!(registry
            .validate_tool_call(
                catalog::IMAGE_GENERATE,
                &json!({"prompt": "a cat", "aspectRatio": "16:9"})
            )
            .is_ok());
        let err = registry
            .validate_tool_call(
                catalog::IMAGE_GENERATE,
                &json!({"prompt": "a cat", "aspectRatio": "21:9"}),
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_validate_non_object_arguments() {
        let registry = ToolRegistry::builtin();
        let err = registry
            .validate_tool_call(catalog::WEB_SEARCH, &json!("rust"))
            .unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_validate_ignores_unknown_fields() {
        let registry = ToolRegistry::builtin();
        let args = json!({"query": "x", "extra": 1});
        assert!(registry.validate_tool_call(catalog::WEB_SEARCH, &args).is_ok());
    }
}
