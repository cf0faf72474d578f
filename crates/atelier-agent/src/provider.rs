use async_trait::async_trait;
use tokio::sync::mpsc;

use atelier_store::{Message, ToolCallRecord};

use crate::stream::StreamEvent;

/// Tool definition as exposed to the LLM. Adapters translate `parameters`
/// (a JSON schema) into each provider's tool format.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request to an LLM provider, in the canonical message schema. The message
/// list includes the system message(s); adapters relocate them per protocol.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Fully accumulated provider response after a (streamed) completion.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Raw provider parts for assistant turns that contained tool calls,
    /// preserved verbatim for providers with signed fields (Gemini).
    pub original_parts: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl ChatOutcome {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_content_filter(&self) -> bool {
        self.finish_reason.as_deref() == Some("content_filter")
    }
}

/// One provider adapter: canonical messages in, wire protocol out, streaming
/// decode back into [`StreamEvent`]s.
///
/// `send_stream` performs exactly one HTTP attempt; the retry policy lives in
/// [`crate::retry::stream_with_retry`] so all three adapters share it.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// One streaming completion attempt. Content and reasoning deltas are
    /// forwarded through `tx` as they arrive; the fully accumulated outcome
    /// (including tool calls) is the return value.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatOutcome, ProviderError>;

    /// Non-streaming convenience: run `send_stream` into a drain channel.
    /// Used by the context manager for summary generation.
    async fn send(&self, req: &ChatRequest) -> Result<ChatOutcome, ProviderError> {
        let (tx, mut rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let result = self.send_stream(req, &tx).await;
        drop(tx);
        let _ = drain.await;
        result
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("retries exhausted after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
}

impl ProviderError {
    /// Whether the retry loop may try again: network failures, provider
    /// timeouts, 5xx and 429. A 4xx other than 429 is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::RateLimited { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Parse(_) => false,
            ProviderError::Exhausted { .. } => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Short human-readable reason for retry events.
    pub fn reason(&self) -> String {
        match self {
            ProviderError::Http(e) if e.is_timeout() => "timeout".to_string(),
            ProviderError::Http(_) => "network error".to_string(),
            ProviderError::RateLimited { .. } => "rate limited".to_string(),
            ProviderError::Api { status, .. } if *status >= 500 => "server error".to_string(),
            ProviderError::Api { .. } => "client error".to_string(),
            ProviderError::Parse(_) => "response parse error".to_string(),
            ProviderError::Exhausted { reason, .. } => reason.clone(),
        }
    }
}

/// Detect a content-filter rejection in a 4xx error body. Matches the
/// phrasing used by the common gateways: "content" together with "filter",
/// "policy" or "management".
pub fn is_content_filter_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("content")
        && (lower.contains("filter") || lower.contains("policy") || lower.contains("management"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(ProviderError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!ProviderError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!ProviderError::Parse("oops".into()).is_retryable());
    }

    #[test]
    fn content_filter_body_detection() {
        assert!(is_content_filter_body(
            r#"{"error":{"message":"The response was filtered due to content management policy"}}"#
        ));
        assert!(is_content_filter_body("content policy violation"));
        assert!(!is_content_filter_body("invalid parameter: temperature"));
    }
}
