//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to Groq (or any endpoint speaking the same
//! API) and streams back tokens. Walks the fallback chain when a model is
//! unavailable. The client is immutable after construction and can be
//! shared behind an `Arc` across concurrent turns.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;

use super::api::{CompletionApi, CompletionStream};
use super::config::{candidate_models, resolve_active_model, ModelConfig, ModelsConfig};
use super::errors::InferenceError;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{
    ChatCompletionRequest, ChatMessage, CompletionResponse, ToolChoice, ToolDefinition,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Total request timeout for streaming calls.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for the hosted completion endpoint.
pub struct InferenceClient {
    /// HTTP client for non-streaming requests.
    http: HttpClient,
    /// HTTP client for streaming requests.
    http_stream: HttpClient,
    /// Models in try-order (active first, then fallbacks).
    candidates: Vec<(String, ModelConfig)>,
}

impl InferenceClient {
    /// Create a new inference client from the models configuration.
    ///
    /// Resolves the active model from config. Does NOT check connectivity;
    /// that happens on the first request.
    pub fn from_config(config: &ModelsConfig) -> Result<Self, InferenceError> {
        let (key, model) = resolve_active_model(config)?;
        tracing::info!(model = %key, base_url = %model.base_url, "inference client ready");

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            candidates: candidate_models(config),
        })
    }

    /// Key of the model tried first.
    pub fn active_model_key(&self) -> Option<&str> {
        self.candidates.first().map(|(k, _)| k.as_str())
    }

    /// Whether an error should trigger a fallback attempt.
    ///
    /// HTTP 400 is not retried: a rejected generation must reach the
    /// malformed-output recovery path with its body intact.
    fn is_retriable(err: &InferenceError) -> bool {
        matches!(
            err,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 404, .. }
                | InferenceError::HttpError { status: 500, .. }
                | InferenceError::HttpError { status: 502..=504, .. }
        )
    }

    /// Send one request to one model and return the successful response.
    async fn send(
        &self,
        http: &HttpClient,
        model: &ModelConfig,
        body: &ChatCompletionRequest,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        // Metadata only: bodies can carry whole documents.
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let mut request = http.post(&url).json(body);
        if let Some(key) = model.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %body.model, "=== LLM ERROR ===");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(response)
    }
}

/// Build the wire request for one model.
fn build_request(
    key: &str,
    model: &ModelConfig,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    tool_choice: Option<ToolChoice>,
    stream: bool,
) -> ChatCompletionRequest {
    let has_tools = !tools.is_empty();
    ChatCompletionRequest {
        model: model.model_name.clone().unwrap_or_else(|| key.to_string()),
        messages: messages.to_vec(),
        tools: has_tools.then(|| tools.to_vec()),
        tool_choice: if has_tools { tool_choice } else { None },
        temperature: model.temperature,
        max_tokens: model.max_tokens,
        stream,
    }
}

#[async_trait]
impl CompletionApi for InferenceClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
    ) -> Result<CompletionResponse, InferenceError> {
        let mut last_error: Option<InferenceError> = None;
        let mut attempted = Vec::new();

        for (key, model) in &self.candidates {
            attempted.push(key.clone());
            let body = build_request(key, model, messages, tools, Some(tool_choice), false);

            let result = match self
                .send(&self.http, model, &body, REQUEST_TIMEOUT.as_secs())
                .await
            {
                Ok(response) => response.text().await.map_err(|e| InferenceError::StreamError {
                    reason: format!("failed to read response body: {e}"),
                }),
                Err(e) => Err(e),
            };

            match result {
                Ok(text) => return parse_non_streaming_response(&text),
                Err(e) if Self::is_retriable(&e) => {
                    tracing::warn!(model = %key, error = %e, "model unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(InferenceError::AllModelsUnavailable { attempted }))
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, InferenceError> {
        let mut last_error: Option<InferenceError> = None;
        let mut attempted = Vec::new();

        for (key, model) in &self.candidates {
            attempted.push(key.clone());
            let body = build_request(key, model, messages, &[], None, true);

            match self
                .send(&self.http_stream, model, &body, STREAM_REQUEST_TIMEOUT.as_secs())
                .await
            {
                Ok(response) => return Ok(parse_sse_stream(response).boxed()),
                Err(e) if Self::is_retriable(&e) => {
                    tracing::warn!(model = %key, error = %e, "model unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(InferenceError::AllModelsUnavailable { attempted }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::FunctionDefinition;
    use std::collections::HashMap;

    fn test_config() -> ModelsConfig {
        let mut models = HashMap::new();
        models.insert(
            "model-a".to_string(),
            ModelConfig {
                display_name: Some("Model A".to_string()),
                base_url: "http://127.0.0.1:9/v1/".to_string(),
                model_name: Some("llama-3.3-70b-versatile".to_string()),
                api_key: Some("test-key".to_string()),
                temperature: 0.7,
                max_tokens: 1024,
            },
        );
        models.insert(
            "model-b".to_string(),
            ModelConfig {
                display_name: None,
                base_url: "http://127.0.0.1:9/v1".to_string(),
                model_name: None,
                api_key: None,
                temperature: 0.5,
                max_tokens: 2048,
            },
        );
        ModelsConfig {
            active_model: "model-a".to_string(),
            models,
            fallback_chain: vec!["model-a".to_string(), "model-b".to_string()],
        }
    }

    fn search_tool() -> ToolDefinition {
        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: "web_search".to_string(),
                description: "Search the web".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            },
        }
    }

    #[test]
    fn test_from_config_orders_candidates() {
        let client = InferenceClient::from_config(&test_config()).unwrap();
        assert_eq!(client.active_model_key(), Some("model-a"));
        assert_eq!(client.candidates.len(), 2);
        assert_eq!(client.candidates[1].0, "model-b");
    }

    #[test]
    fn test_build_request_with_tools() {
        let config = test_config();
        let model = &config.models["model-a"];
        let req = build_request(
            "model-a",
            model,
            &[ChatMessage::user("hi")],
            &[search_tool()],
            Some(ToolChoice::Auto),
            false,
        );
        assert_eq!(req.model, "llama-3.3-70b-versatile");
        assert_eq!(req.tools.as_ref().map(|t| t.len()), Some(1));
        assert_eq!(req.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn test_build_request_without_tools_drops_choice() {
        let config = test_config();
        let model = &config.models["model-b"];
        let req = build_request("model-b", model, &[], &[], Some(ToolChoice::Auto), true);
        assert_eq!(req.model, "model-b");
        assert!(req.tools.is_none());
        assert!(req.tool_choice.is_none());
        assert!(req.stream);
    }

    #[test]
    fn test_is_retriable() {
        assert!(InferenceClient::is_retriable(&InferenceError::ConnectionFailed {
            endpoint: "".into(),
            reason: "".into()
        }));
        assert!(InferenceClient::is_retriable(&InferenceError::Timeout {
            duration_secs: 5
        }));
        assert!(InferenceClient::is_retriable(&InferenceError::HttpError {
            status: 503,
            body: "".into()
        }));
        assert!(!InferenceClient::is_retriable(&InferenceError::HttpError {
            status: 400,
            body: "failed_generation".into()
        }));
        assert!(!InferenceClient::is_retriable(&InferenceError::HttpError {
            status: 401,
            body: "invalid api key".into()
        }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_exhaust_chain() {
        // Port 9 (discard) is closed on loopback; both candidates fail to connect.
        let client = InferenceClient::from_config(&test_config()).unwrap();
        let err = client
            .complete(&[ChatMessage::user("hi")], &[], ToolChoice::Auto)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        ));
    }
}
