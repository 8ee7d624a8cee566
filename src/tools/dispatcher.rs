//! ToolDispatcher: executes model tool calls against bound providers.
//!
//! Lifecycle per invocation: resolve → check active set → validate →
//! execute. Every invocation yields exactly one `ToolResult`; failures are
//! rendered into the `{"error": "..."}` envelope instead of propagating, so
//! one bad call never aborts the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::inference::types::ToolCall;

use super::errors::ToolError;
use super::registry::ToolRegistry;
use super::types::{ToolProvider, ToolResult, UserContext};

/// Registered tools plus the providers bound to them by name.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    registry: ToolRegistry,
    providers: HashMap<String, Arc<dyn ToolProvider>>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            providers: HashMap::new(),
        }
    }

    /// Bind a provider to a tool name, replacing any previous binding.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ToolProvider>) -> Self {
        self.bind(name, provider);
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, provider: Arc<dyn ToolProvider>) {
        let name = name.into();
        if !self.registry.contains(&name) {
            tracing::warn!(tool = %name, "binding provider for a tool that is not registered");
        }
        self.providers.insert(name, provider);
    }

    /// Every tool this dispatcher knows about.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch one call.
    ///
    /// `active` is the tool set offered this turn; a registered tool outside
    /// it is refused rather than executed.
    pub async fn dispatch(
        &self,
        ctx: &UserContext,
        active: &ToolRegistry,
        call: &ToolCall,
    ) -> ToolResult {
        let start = Instant::now();

        let outcome = match self.execute(ctx, active, call).await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %err, "tool call failed");
                Err(err.to_envelope())
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;
        let (success, payload) = match outcome {
            Ok(value) => (true, value),
            Err(envelope) => (false, envelope),
        };

        tracing::info!(
            tool = %call.name,
            id = %call.id,
            success,
            elapsed_ms = elapsed,
            "tool call finished"
        );

        ToolResult {
            invocation_id: call.id.clone(),
            tool_name: call.name.clone(),
            success,
            payload,
            execution_time_ms: elapsed,
        }
    }

    async fn execute(
        &self,
        ctx: &UserContext,
        active: &ToolRegistry,
        call: &ToolCall,
    ) -> Result<serde_json::Value, ToolError> {
        if !self.registry.contains(&call.name) {
            return Err(ToolError::UnknownTool {
                name: call.name.clone(),
            });
        }
        if !active.contains(&call.name) {
            return Err(ToolError::NotEnabled {
                name: call.name.clone(),
            });
        }

        self.registry.validate_tool_call(&call.name, &call.arguments)?;

        let provider = self
            .providers
            .get(&call.name)
            .ok_or_else(|| ToolError::NoProvider {
                name: call.name.clone(),
            })?;

        tracing::debug!(tool = %call.name, args = %call.arguments, "executing tool");

        provider
            .call(ctx, &call.arguments)
            .await
            .map_err(|e| ToolError::Provider {
                tool: call.name.clone(),
                message: e.to_string(),
            })
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        bound.sort_unstable();
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.registry.tool_names())
            .field("providers", &bound)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolProvider for Echo {
        async fn call(
            &self,
            ctx: &UserContext,
            arguments: &serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(json!({"user": ctx.user_id, "echo": arguments}))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolProvider for Failing {
        async fn call(
            &self,
            _ctx: &UserContext,
            _arguments: &serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("Google account not connected")
        }
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(ToolRegistry::builtin())
            .with_provider(catalog::WEB_SEARCH, Arc::new(Echo))
            .with_provider(catalog::GOOGLE_GMAIL_LIST_MESSAGES, Arc::new(Failing))
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let d = dispatcher();
        let ctx = UserContext::new("u1");
        let result = d
            .dispatch(&ctx, d.registry(), &call("call_1", catalog::WEB_SEARCH, json!({"query": "rust"})))
            .await;

        assert!(result.success);
        assert_eq!(result.invocation_id, "call_1");
        assert_eq!(result.payload["user"], "u1");
        assert_eq!(result.payload["echo"]["query"], "rust");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let d = dispatcher();
        let result = d
            .dispatch(
                &UserContext::new("u1"),
                d.registry(),
                &call("call_9", "nonexistent_tool", json!({})),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.invocation_id, "call_9");
        assert_eq!(result.payload, json!({"error": "Unknown tool: nonexistent_tool"}));
        assert_eq!(result.content(), r#"{"error":"Unknown tool: nonexistent_tool"}"#);
    }

    #[tokio::test]
    async fn test_dispatch_tool_outside_active_set() {
        let d = dispatcher();
        let active = d.registry().without(catalog::WEB_SEARCH);
        let result = d
            .dispatch(
                &UserContext::new("u1"),
                &active,
                &call("call_1", catalog::WEB_SEARCH, json!({"query": "rust"})),
            )
            .await;

        assert!(!result.success);
        assert_eq!(
            result.payload["error"],
            "Tool not enabled for this turn: web_search"
        );
    }

    #[tokio::test]
    async fn test_dispatch_provider_error_becomes_envelope() {
        let d = dispatcher();
        let result = d
            .dispatch(
                &UserContext::new("u1"),
                d.registry(),
                &call("call_1", catalog::GOOGLE_GMAIL_LIST_MESSAGES, json!({})),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.payload, json!({"error": "Google account not connected"}));
    }

    #[tokio::test]
    async fn test_dispatch_validation_failure() {
        let d = dispatcher();
        let result = d
            .dispatch(
                &UserContext::new("u1"),
                d.registry(),
                &call("call_1", catalog::WEB_SEARCH, json!({})),
            )
            .await;

        assert!(!result.success);
        assert!(result.payload["error"]
            .as_str()
            .unwrap()
            .contains("missing required field: 'query'"));
    }

    #[tokio::test]
    async fn test_dispatch_without_provider() {
        let d = dispatcher();
        let result = d
            .dispatch(
                &UserContext::new("u1"),
                d.registry(),
                &call("call_1", catalog::GOOGLE_DRIVE_LIST_FILES, json!({})),
            )
            .await;

        assert!(!result.success);
        assert_eq!(
            result.payload["error"],
            "No provider configured for tool: google_drive_list_files"
        );
    }
}
