//! Anthropic native messages adapter.
//!
//! Canonical messages translate as: system messages concatenate into the
//! top-level `system` field; assistant tool calls become `tool_use` content
//! blocks; tool messages become user messages holding a single `tool_result`
//! block. Before every request the message list is walked to drop orphan
//! tool results — the API hard-rejects a `tool_result` whose `tool_use_id`
//! was not emitted by the most recent assistant message.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use atelier_store::{ContentPart, Message, MessageContent, Role};

use crate::openai::CONTENT_FILTER_NOTICE;
use crate::provider::{
    is_content_filter_body, ChatOutcome, ChatRequest, ProviderAdapter, ProviderError,
};
use crate::stream::StreamEvent;
use crate::wire::{lenient_arguments, sanitize_json_numbers};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatOutcome, ProviderError> {
        let mut body = build_request_body(req);
        body["stream"] = serde_json::json!(true);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending streaming request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
            if (400..500).contains(&status) && is_content_filter_body(&text) {
                warn!(status, "content filter rejection from Anthropic");
                return Ok(ChatOutcome {
                    content: Some(CONTENT_FILTER_NOTICE.to_string()),
                    finish_reason: Some("content_filter".to_string()),
                    ..Default::default()
                });
            }
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        crate::anthropic_stream::decode_stream(resp, tx).await
    }
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<serde_json::Value> = Vec::new();

    // Ids of tool_use blocks emitted by the most recent assistant message.
    // Tool results referencing anything else are orphans and are dropped.
    let mut expected_tool_ids: HashSet<String> = HashSet::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => {
                system_parts.push(msg.content.as_text());
            }
            Role::Assistant => {
                expected_tool_ids.clear();
                let mut blocks: Vec<serde_json::Value> = Vec::new();
                let text = msg.content.as_text();
                if !text.trim().is_empty() {
                    blocks.push(serde_json::json!({ "type": "text", "text": text }));
                }
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        expected_tool_ids.insert(call.id.clone());
                        let input = lenient_arguments(&serde_json::Value::String(
                            call.arguments.clone(),
                        ));
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": input,
                        }));
                    }
                }
                if blocks.is_empty() {
                    blocks.push(serde_json::json!({ "type": "text", "text": "…" }));
                }
                messages.push(serde_json::json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                let tool_use_id = msg.tool_call_id.clone().unwrap_or_default();
                if !expected_tool_ids.remove(&tool_use_id) {
                    warn!(tool_use_id, "dropping orphan tool result");
                    expected_tool_ids.clear();
                    continue;
                }
                let text = msg.content.as_text();
                let result_text = if text.is_empty() { "(empty)" } else { text.as_str() };
                messages.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": [{ "type": "text", "text": result_text }],
                    }],
                }));
            }
            Role::User => {
                expected_tool_ids.clear();
                messages.push(serde_json::json!({
                    "role": "user",
                    "content": user_blocks(&msg.content),
                }));
            }
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "messages": messages,
        "stream": false,
    });

    if !system_parts.is_empty() {
        body["system"] = serde_json::json!(system_parts.join("\n\n"));
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
        body["tool_choice"] = serde_json::json!({ "type": "auto" });
    }

    sanitize_json_numbers(&mut body);
    body
}

fn user_blocks(content: &MessageContent) -> serde_json::Value {
    match content {
        MessageContent::Text(text) => {
            let text = if text.trim().is_empty() { "…" } else { text };
            serde_json::json!([{ "type": "text", "text": text }])
        }
        MessageContent::Parts(parts) => {
            let blocks: Vec<serde_json::Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => serde_json::json!({
                        "type": "text",
                        "text": text,
                    }),
                    ContentPart::Image {
                        media_type, data, ..
                    } => serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type,
                            "data": data,
                        },
                    }),
                })
                .collect();
            if blocks.is_empty() {
                serde_json::json!([{ "type": "text", "text": "…" }])
            } else {
                serde_json::Value::Array(blocks)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::MessageId;
    use atelier_store::{MessageStatus, ToolCallRecord};

    fn base_msg(role: Role, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            role,
            content: MessageContent::text(text),
            created_at: "2026-08-01 10:00:00".into(),
            updated_at: "2026-08-01 10:00:00".into(),
            status: MessageStatus::Completed,
            tool_calls: None,
            original_parts: None,
            tool_call_id: None,
            name: None,
            client_msg_id: None,
            generated_files: vec![],
            extra: Default::default(),
        }
    }

    fn req(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "claude-sonnet-4".into(),
            messages,
            tools: vec![],
            temperature: 0.3,
            max_tokens: 2048,
        }
    }

    #[test]
    fn system_messages_concatenate_into_system_field() {
        let body = build_request_body(&req(vec![
            base_msg(Role::System, "You are helpful."),
            base_msg(Role::User, "hi"),
        ]));
        assert_eq!(body["system"], "You are helpful.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let mut assistant = base_msg(Role::Assistant, "let me check");
        assistant.tool_calls = Some(vec![ToolCallRecord {
            id: "toolu_1".into(),
            name: "web_search".into(),
            arguments: r#"{"query":"rust"}"#.into(),
        }]);
        let mut tool = base_msg(Role::Tool, "results here");
        tool.tool_call_id = Some("toolu_1".into());
        tool.name = Some("web_search".into());

        let body = build_request_body(&req(vec![assistant, tool]));
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["input"]["query"], "rust");

        let result_msg = &body["messages"][1];
        assert_eq!(result_msg["role"], "user");
        assert_eq!(result_msg["content"][0]["type"], "tool_result");
        assert_eq!(result_msg["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn orphan_tool_results_are_dropped() {
        let mut orphan = base_msg(Role::Tool, "stale result");
        orphan.tool_call_id = Some("toolu_ghost".into());

        let body = build_request_body(&req(vec![
            base_msg(Role::User, "hello"),
            orphan,
            base_msg(Role::Assistant, "hi there"),
        ]));
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }

    #[test]
    fn user_message_resets_expected_set() {
        let mut assistant = base_msg(Role::Assistant, "");
        assistant.tool_calls = Some(vec![ToolCallRecord {
            id: "toolu_2".into(),
            name: "code_executor".into(),
            arguments: "{}".into(),
        }]);
        // A user message interleaves before the tool result, so the result
        // is orphaned.
        let mut late_result = base_msg(Role::Tool, "late");
        late_result.tool_call_id = Some("toolu_2".into());

        let body = build_request_body(&req(vec![
            assistant,
            base_msg(Role::User, "never mind"),
            late_result,
        ]));
        let last = body["messages"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["role"], "user");
        assert_eq!(last["content"][0]["type"], "text");
    }

    #[test]
    fn image_parts_convert_to_base64_source() {
        let mut user = base_msg(Role::User, "");
        user.content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "look at this".into(),
            },
            ContentPart::Image {
                media_type: "image/jpeg".into(),
                data: "QUJD".into(),
                detail: Default::default(),
            },
        ]);
        let body = build_request_body(&req(vec![user]));
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks[1]["type"], "image");
        assert_eq!(blocks[1]["source"]["type"], "base64");
        assert_eq!(blocks[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(blocks[1]["source"]["data"], "QUJD");
    }
}
