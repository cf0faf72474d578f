//! Google Gemini native `generateContent` adapter.
//!
//! Gemini differences the translation has to absorb: role `assistant` maps to
//! `model`; there is no tool role (function responses ride in `user`
//! messages to keep the strict user/model alternation); JSON-schema type
//! tokens are uppercased; and assistant turns that carried `functionCall`
//! parts must be round-tripped byte-for-byte because the provider signs
//! opaque fields (`thoughtSignature`) that cannot be reconstructed. A
//! synthetic tool-call message without its preserved parts is dropped rather
//! than forged.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use atelier_store::{ContentPart, Message, MessageContent, Role, ToolCallRecord};

use crate::openai::CONTENT_FILTER_NOTICE;
use crate::provider::{
    is_content_filter_body, ChatOutcome, ChatRequest, ProviderAdapter, ProviderError,
};
use crate::stream::StreamEvent;
use crate::wire::sanitize_json_numbers;

pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatOutcome, ProviderError> {
        let body = build_request_body(req);
        let url = self.endpoint(&req.model);

        debug!(model = %req.model, "sending request to Gemini");

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
            return Err(ProviderError::RateLimited {
                retry_after_ms: None,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            if (400..500).contains(&status) && is_content_filter_body(&text) {
                warn!(status, "content filter rejection from Gemini");
                return Ok(ChatOutcome {
                    content: Some(CONTENT_FILTER_NOTICE.to_string()),
                    finish_reason: Some("content_filter".to_string()),
                    ..Default::default()
                });
            }
            warn!(status, body = %text, "Gemini API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        decode_response(api_resp, tx).await
    }
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut system_instruction: Vec<String> = Vec::new();
    let mut contents: Vec<serde_json::Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => {
                system_instruction.push(msg.content.as_text());
            }
            Role::Assistant => {
                // Preserved native parts win, even when tool_calls were
                // stripped by repair: the parts are the signed original.
                if let Some(parts) = &msg.original_parts {
                    contents.push(serde_json::json!({
                        "role": "model",
                        "parts": parts.clone(),
                    }));
                    continue;
                }
                if msg.tool_calls.as_ref().map(|c| !c.is_empty()).unwrap_or(false) {
                    // Signed fields cannot be forged; drop the whole turn.
                    warn!("dropping assistant tool-call turn without preserved Gemini parts");
                    continue;
                }
                let text = msg.content.as_text();
                if !text.is_empty() {
                    contents.push(serde_json::json!({
                        "role": "model",
                        "parts": [{ "text": text }],
                    }));
                }
            }
            Role::Tool => {
                let name = msg.name.clone().unwrap_or_else(|| "unknown".to_string());
                contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": { "content": msg.content.as_text() },
                        }
                    }],
                }));
            }
            Role::User => {
                contents.push(serde_json::json!({
                    "role": "user",
                    "parts": user_parts(&msg.content),
                }));
            }
        }
    }

    // System instruction rides as a bracketed preamble on the first user
    // message.
    if !system_instruction.is_empty() {
        let preamble = format!(
            "[System Instructions: {}]\n\n",
            system_instruction.join("\n\n")
        );
        if let Some(first_user) = contents
            .iter_mut()
            .find(|c| c["role"] == "user")
            .and_then(|c| c["parts"].as_array_mut())
        {
            first_user.insert(0, serde_json::json!({ "text": preamble }));
        }
    }

    let contents = merge_consecutive_roles(contents);
    let contents = ensure_user_first(contents);

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "temperature": req.temperature,
            "maxOutputTokens": req.max_tokens,
        },
    });

    if !req.tools.is_empty() {
        let declarations: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": uppercase_schema_types(&t.parameters),
                })
            })
            .collect();
        body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
    }

    sanitize_json_numbers(&mut body);
    body
}

fn user_parts(content: &MessageContent) -> serde_json::Value {
    match content {
        MessageContent::Text(text) => serde_json::json!([{ "text": text }]),
        MessageContent::Parts(parts) => serde_json::Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => serde_json::json!({ "text": text }),
                    ContentPart::Image {
                        media_type, data, ..
                    } => serde_json::json!({
                        "inline_data": { "mime_type": media_type, "data": data }
                    }),
                })
                .collect(),
        ),
    }
}

/// Gemini requires strict user/model alternation, so adjacent same-role
/// messages merge: two single text parts concatenate with a blank line,
/// anything else appends parts.
fn merge_consecutive_roles(contents: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    let mut merged: Vec<serde_json::Value> = Vec::new();
    for msg in contents {
        let Some(last) = merged.last_mut() else {
            merged.push(msg);
            continue;
        };
        if last["role"] != msg["role"] {
            merged.push(msg);
            continue;
        }

        let both_single_text = single_text(last).is_some() && single_text(&msg).is_some();
        if both_single_text {
            let addition = single_text(&msg).unwrap_or_default();
            let existing = last["parts"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            last["parts"][0]["text"] =
                serde_json::json!(format!("{existing}\n\n{addition}"));
        } else if let (Some(last_parts), Some(new_parts)) =
            (last["parts"].as_array_mut(), msg["parts"].as_array())
        {
            last_parts.extend(new_parts.iter().cloned());
        }
    }
    merged
}

fn single_text(msg: &serde_json::Value) -> Option<String> {
    let parts = msg["parts"].as_array()?;
    if parts.len() != 1 {
        return None;
    }
    parts[0]["text"].as_str().map(String::from)
}

fn ensure_user_first(mut contents: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    let starts_with_user = contents
        .first()
        .map(|c| c["role"] == "user")
        .unwrap_or(false);
    if !starts_with_user {
        contents.insert(
            0,
            serde_json::json!({ "role": "user", "parts": [{ "text": "Continue." }] }),
        );
    }
    contents
}

/// Recursively uppercase JSON-schema `type` tokens the way Gemini's
/// functionDeclarations expect (OBJECT, STRING, INTEGER, NUMBER, BOOLEAN,
/// ARRAY).
pub(crate) fn uppercase_schema_types(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                if key == "type" {
                    if let Some(t) = value.as_str() {
                        out.insert(key.clone(), serde_json::json!(t.to_uppercase()));
                        continue;
                    }
                }
                out.insert(key.clone(), uppercase_schema_types(value));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(uppercase_schema_types).collect())
        }
        other => other.clone(),
    }
}

async fn decode_response(
    resp: GeminiResponse,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<ChatOutcome, ProviderError> {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
    let mut preserved_parts: Vec<serde_json::Value> = Vec::new();
    let mut finish_reason: Option<String> = None;

    if let Some(candidate) = resp.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            // Thinking text appears under a few different keys across model
            // generations.
            if let Some(thought) = part
                .get("thought")
                .or_else(|| part.get("thoughtText"))
                .or_else(|| part.get("thinking"))
                .and_then(|v| v.as_str())
            {
                reasoning.push_str(thought);
                let _ = tx
                    .send(StreamEvent::Reasoning {
                        delta: thought.to_string(),
                    })
                    .await;
            }

            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                content.push_str(text);
                let _ = tx
                    .send(StreamEvent::Content {
                        delta: text.to_string(),
                    })
                    .await;
            }

            if let Some(fc) = part.get("functionCall") {
                // Keep the raw part (including any thoughtSignature) for the
                // next request's round-trip.
                preserved_parts.push(part.clone());
                let name = fc
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let args = fc.get("args").cloned().unwrap_or(serde_json::json!({}));
                let id = format!(
                    "call_{}_{}",
                    &Uuid::new_v4().simple().to_string()[..8],
                    tool_calls.len()
                );
                tool_calls.push(ToolCallRecord {
                    id,
                    name,
                    arguments: args.to_string(),
                });
            }
        }
    }

    let tokens_in = resp
        .usage_metadata
        .as_ref()
        .map(|u| u.prompt_token_count)
        .unwrap_or(0);
    let tokens_out = resp
        .usage_metadata
        .as_ref()
        .map(|u| u.candidates_token_count)
        .unwrap_or(0);

    Ok(ChatOutcome {
        content: if content.is_empty() { None } else { Some(content) },
        reasoning: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
        original_parts: if preserved_parts.is_empty() {
            None
        } else {
            Some(serde_json::Value::Array(preserved_parts))
        },
        tool_calls,
        finish_reason,
        tokens_in,
        tokens_out,
    })
}

// Gemini response types (deserialization only).

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}
