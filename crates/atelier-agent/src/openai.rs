//! OpenAI-compatible chat-completions adapter.
//!
//! Also serves every OpenAI-compatible gateway (GLM, Deepseek, Moonshot, …)
//! by parameterising the base URL and chat path.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use atelier_store::{ContentPart, Message, MessageContent, Role, ToolCallRecord};

use crate::provider::{
    is_content_filter_body, ChatOutcome, ChatRequest, ProviderAdapter, ProviderError,
};
use crate::stream::{parse_sse_line, LineBuffer, SseParsed, StreamEvent};
use crate::wire::{build_data_url, sanitize_json_numbers};

/// System notice substituted for the model output when the provider rejects
/// a request on content-policy grounds.
pub const CONTENT_FILTER_NOTICE: &str =
    "[system notice] The previous request triggered the provider's content \
     safety policy. The turn was terminated without a model response.";

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    provider_name: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_path(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/chat/completions".to_string(),
        )
    }

    /// A named OpenAI-compatible endpoint. `base_url` without trailing slash,
    /// `chat_path` starting with "/".
    pub fn with_path(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatOutcome, ProviderError> {
        let body = build_request_body(req, true);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, "sending streaming request to OpenAI-compatible endpoint");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            // Content-filter rejections are a recoverable signal, not an
            // exception: surface as a terminal outcome for this turn.
            if (400..500).contains(&status) && is_content_filter_body(&text) {
                warn!(status, "content filter rejection from provider");
                return Ok(ChatOutcome {
                    content: Some(CONTENT_FILTER_NOTICE.to_string()),
                    finish_reason: Some("content_filter".to_string()),
                    ..Default::default()
                });
            }
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        decode_stream(resp, tx).await
    }
}

pub(crate) fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req.messages.iter().map(message_to_openai).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "temperature": req.temperature,
        "max_tokens": req.max_tokens,
        "stream": stream,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
        body["tool_choice"] = serde_json::json!("auto");
    }

    sanitize_json_numbers(&mut body);
    body
}

fn message_to_openai(msg: &Message) -> serde_json::Value {
    let role = msg.role.to_string();

    let content = match &msg.content {
        MessageContent::Text(text) => {
            // Some gateways reject empty text blocks outright.
            let text = if text.trim().is_empty() { "…" } else { text.as_str() };
            serde_json::Value::String(text.to_string())
        }
        MessageContent::Parts(parts) => serde_json::Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => serde_json::json!({
                        "type": "text",
                        "text": text,
                    }),
                    ContentPart::Image {
                        media_type,
                        data,
                        detail,
                    } => serde_json::json!({
                        "type": "image_url",
                        "image_url": {
                            "url": build_data_url(media_type, data),
                            "detail": detail.as_str(),
                        }
                    }),
                })
                .collect(),
        ),
    };

    let mut out = serde_json::json!({ "role": role, "content": content });

    if msg.role == Role::Assistant {
        if let Some(calls) = &msg.tool_calls {
            out["tool_calls"] = serde_json::Value::Array(
                calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect(),
            );
        }
    }

    if msg.role == Role::Tool {
        if let Some(id) = &msg.tool_call_id {
            out["tool_call_id"] = serde_json::json!(id);
        }
        if let Some(name) = &msg.name {
            out["name"] = serde_json::json!(name);
        }
    }

    out
}

/// Accumulating state for one indexed tool-call slot in the stream.
#[derive(Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

async fn decode_stream(
    resp: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<ChatOutcome, ProviderError> {
    use futures_util::StreamExt;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut partial_calls: Vec<PartialToolCall> = Vec::new();
    let mut finish_reason: Option<String> = None;
    let mut tokens_in = 0u32;
    let mut tokens_out = 0u32;

    let mut lines = LineBuffer::new();
    let mut byte_stream = resp.bytes_stream();
    let mut done = false;

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| {
            let _ = tx.try_send(StreamEvent::Error {
                message: e.to_string(),
            });
            ProviderError::Parse(format!("stream interrupted: {e}"))
        })?;

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t.to_string(),
            Err(_) => continue,
        };

        for line in lines.push(&text) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                continue;
            };
            if data.trim() == "[DONE]" {
                done = true;
                break 'outer;
            }

            let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) else {
                debug!(data = %data, "undecodable stream chunk, skipping");
                continue;
            };

            if let Some(usage) = &chunk_resp.usage {
                tokens_in = usage.prompt_tokens;
                tokens_out = usage.completion_tokens;
            }

            for choice in &chunk_resp.choices {
                if let Some(reason) = &choice.finish_reason {
                    if !reason.is_empty() {
                        finish_reason = Some(reason.clone());
                    }
                }

                let delta = &choice.delta;

                // Reasoning deltas arrive under either key depending on the
                // gateway (`reasoning` or `reasoning_content`).
                if let Some(r) = delta
                    .reasoning
                    .as_deref()
                    .or(delta.reasoning_content.as_deref())
                {
                    if !r.is_empty() {
                        reasoning.push_str(r);
                        if tx
                            .send(StreamEvent::Reasoning {
                                delta: r.to_string(),
                            })
                            .await
                            .is_err()
                        {
                            done = true;
                            break 'outer;
                        }
                    }
                }

                if let Some(c) = &delta.content {
                    if !c.is_empty() {
                        content.push_str(c);
                        if tx
                            .send(StreamEvent::Content { delta: c.clone() })
                            .await
                            .is_err()
                        {
                            done = true;
                            break 'outer;
                        }
                    }
                }

                if let Some(calls) = &delta.tool_calls {
                    for tc in calls {
                        let index = tc.index.unwrap_or(0);
                        while partial_calls.len() <= index {
                            partial_calls.push(PartialToolCall::default());
                        }
                        let slot = &mut partial_calls[index];
                        if let Some(id) = &tc.id {
                            slot.id = id.clone();
                        }
                        if let Some(f) = &tc.function {
                            if let Some(name) = &f.name {
                                slot.name = name.clone();
                            }
                            if let Some(args) = &f.arguments {
                                slot.arguments.push_str(args);
                            }
                        }
                    }
                }
            }
        }
    }

    if !done {
        debug!("stream ended without [DONE] terminator");
    }

    let tool_calls: Vec<ToolCallRecord> = partial_calls
        .into_iter()
        .filter(|c| !c.name.is_empty())
        .enumerate()
        .map(|(i, c)| ToolCallRecord {
            id: if c.id.is_empty() {
                format!("call_{i}")
            } else {
                c.id
            },
            name: c.name,
            arguments: if c.arguments.is_empty() {
                "{}".to_string()
            } else {
                c.arguments
            },
        })
        .collect();

    Ok(ChatOutcome {
        content: if content.is_empty() { None } else { Some(content) },
        reasoning: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
        tool_calls,
        original_parts: None,
        finish_reason,
        tokens_in,
        tokens_out,
    })
}

// Streaming chunk types (deserialization only).

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolSchema;
    use atelier_store::store::NewMessage;

    fn msg(role: Role, text: &str) -> Message {
        message_from(NewMessage::new(role, MessageContent::text(text)))
    }

    fn message_from(new: NewMessage) -> Message {
        Message {
            id: atelier_core::MessageId::new(),
            role: new.role.unwrap(),
            content: new.content,
            created_at: "2026-08-01 10:00:00".into(),
            updated_at: "2026-08-01 10:00:00".into(),
            status: Default::default(),
            tool_calls: new.tool_calls,
            original_parts: None,
            tool_call_id: new.tool_call_id,
            name: new.name,
            client_msg_id: None,
            generated_files: vec![],
            extra: Default::default(),
        }
    }

    #[test]
    fn empty_content_becomes_ellipsis() {
        let body = build_request_body(
            &ChatRequest {
                model: "gpt-5".into(),
                messages: vec![msg(Role::Assistant, "")],
                tools: vec![],
                temperature: 0.3,
                max_tokens: 1024,
            },
            false,
        );
        assert_eq!(body["messages"][0]["content"], "…");
    }

    #[test]
    fn tool_calls_serialize_in_function_format() {
        let assistant = message_from(
            NewMessage::new(Role::Assistant, MessageContent::text("working"))
                .with_tool_calls(vec![ToolCallRecord {
                    id: "call_1".into(),
                    name: "code_executor".into(),
                    arguments: "{\"code\":\"print(1)\"}".into(),
                }]),
        );
        let body = build_request_body(
            &ChatRequest {
                model: "gpt-5".into(),
                messages: vec![assistant],
                tools: vec![],
                temperature: 0.3,
                max_tokens: 1024,
            },
            true,
        );
        let tc = &body["messages"][0]["tool_calls"][0];
        assert_eq!(tc["id"], "call_1");
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["function"]["name"], "code_executor");
    }

    #[test]
    fn tool_messages_carry_call_id_and_name() {
        let tool = message_from(NewMessage::tool("call_9", "web_search", "{\"ok\":true}"));
        let body = build_request_body(
            &ChatRequest {
                model: "gpt-5".into(),
                messages: vec![tool],
                tools: vec![],
                temperature: 0.3,
                max_tokens: 64,
            },
            false,
        );
        assert_eq!(body["messages"][0]["role"], "tool");
        assert_eq!(body["messages"][0]["tool_call_id"], "call_9");
        assert_eq!(body["messages"][0]["name"], "web_search");
    }

    #[test]
    fn tools_wrap_into_function_entries() {
        let body = build_request_body(
            &ChatRequest {
                model: "gpt-5".into(),
                messages: vec![msg(Role::User, "hi")],
                tools: vec![ToolSchema {
                    name: "web_search".into(),
                    description: "search".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                }],
                temperature: 0.3,
                max_tokens: 64,
            },
            true,
        );
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
        assert_eq!(body["tool_choice"], "auto");
    }
}
