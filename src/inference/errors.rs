//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the completion API.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Every model in the fallback chain was unavailable.
    #[error("all models unavailable (tried: {})", attempted.join(", "))]
    AllModelsUnavailable {
        attempted: Vec<String>,
    },

    /// Non-2xx HTTP response from the model endpoint.
    ///
    /// The body is kept verbatim: Groq-style providers put the model's
    /// rejected output (`failed_generation`) in here.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// HTTP status for transport-level errors, `0` when no response arrived.
    pub fn status(&self) -> u16 {
        match self {
            InferenceError::HttpError { status, .. } => *status,
            _ => 0,
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the provider rejected a generation it could not parse as a
    /// tool call (Groq answers these with HTTP 400 and `failed_generation`).
    pub fn is_failed_generation(&self) -> bool {
        matches!(
            self,
            InferenceError::HttpError { status: 400, body }
                if body.contains("failed_generation") || body.contains("<function=")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_failed_generation_true() {
        let err = InferenceError::HttpError {
            status: 400,
            body: r#"{"error":{"code":"tool_use_failed","failed_generation":"<function=web_search>{}</function>"}}"#
                .to_string(),
        };
        assert!(err.is_failed_generation());
    }

    #[test]
    fn test_is_failed_generation_false_different_status() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "failed_generation".to_string(),
        };
        assert!(!err.is_failed_generation());
    }

    #[test]
    fn test_is_failed_generation_false_plain_400() {
        let err = InferenceError::HttpError {
            status: 400,
            body: "context length exceeded".to_string(),
        };
        assert!(!err.is_failed_generation());
    }

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
        assert_eq!(err.status(), 0);
    }
}
