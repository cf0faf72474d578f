//! Anthropic SSE stream decoder.
//!
//! Event sequence: `message_start` → (`content_block_start` →
//! `content_block_delta`* → `content_block_stop`)* → `message_delta` →
//! `message_stop`. Text deltas stream out immediately; tool_use input JSON
//! accumulates until its block closes.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use atelier_store::ToolCallRecord;

use crate::provider::{ChatOutcome, ProviderError};
use crate::stream::{parse_sse_line, LineBuffer, SseParsed, StreamEvent};

#[derive(Default)]
struct DecodeState {
    current_event: String,
    current_block_type: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    tool_use_initial_input: Option<serde_json::Value>,
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCallRecord>,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: Option<String>,
}

pub(crate) async fn decode_stream(
    resp: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<ChatOutcome, ProviderError> {
    use futures_util::StreamExt;

    let mut state = DecodeState::default();
    let mut lines = LineBuffer::new();
    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| ProviderError::Parse(format!("stream interrupted: {e}")))?;
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t.to_string(),
            Err(_) => continue,
        };

        for line in lines.push(&text) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => state.current_event = ev,
                Some(SseParsed::Data(data)) => {
                    if let Some(event) = handle_data(&mut state, &data) {
                        if tx.send(event).await.is_err() {
                            break 'outer; // receiver dropped
                        }
                    }
                    if state.current_event == "message_stop" {
                        break 'outer;
                    }
                }
                None => {}
            }
        }
    }

    Ok(ChatOutcome {
        content: if state.content.is_empty() {
            None
        } else {
            Some(state.content)
        },
        reasoning: if state.reasoning.is_empty() {
            None
        } else {
            Some(state.reasoning)
        },
        tool_calls: state.tool_calls,
        original_parts: None,
        finish_reason: state.stop_reason,
        tokens_in: state.tokens_in,
        tokens_out: state.tokens_out,
    })
}

fn handle_data(state: &mut DecodeState, data: &str) -> Option<StreamEvent> {
    match state.current_event.as_str() {
        "message_start" => {
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                state.tokens_in = msg.message.usage.input_tokens;
            }
            None
        }

        "content_block_start" => {
            if let Ok(start) = serde_json::from_str::<ContentBlockStart>(data) {
                state.current_block_type = start.content_block.block_type.clone();
                if start.content_block.block_type == "tool_use" {
                    state.tool_use_id = start.content_block.id.unwrap_or_default();
                    state.tool_use_name = start.content_block.name.unwrap_or_default();
                    state.tool_use_initial_input = start.content_block.input;
                    state.tool_use_input_json.clear();
                }
            }
            None
        }

        "content_block_delta" => {
            let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) else {
                return None;
            };
            match delta.delta.delta_type.as_str() {
                "text_delta" => {
                    if let Some(text) = delta.delta.text {
                        state.content.push_str(&text);
                        return Some(StreamEvent::Content { delta: text });
                    }
                }
                "thinking_delta" => {
                    if let Some(text) = delta.delta.thinking {
                        state.reasoning.push_str(&text);
                        return Some(StreamEvent::Reasoning { delta: text });
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta.delta.partial_json {
                        state.tool_use_input_json.push_str(&partial);
                    }
                }
                other => {
                    debug!(delta_type = other, "unhandled delta type");
                }
            }
            None
        }

        "content_block_stop" => {
            if state.current_block_type == "tool_use" {
                finalize_tool_use(state);
            }
            state.current_block_type.clear();
            None
        }

        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                state.tokens_out = delta.usage.output_tokens;
                if let Some(reason) = delta.delta.stop_reason {
                    state.stop_reason = Some(reason);
                }
            }
            None
        }

        "error" => {
            warn!(data, "anthropic stream error event");
            Some(StreamEvent::Error {
                message: data.to_string(),
            })
        }

        // message_stop, ping, unknown events — nothing to extract.
        _ => None,
    }
}

/// Close out the current tool_use block: prefer the streamed partial JSON,
/// fall back to the initial `input` object from block start.
fn finalize_tool_use(state: &mut DecodeState) {
    let arguments = if !state.tool_use_input_json.trim().is_empty() {
        match serde_json::from_str::<serde_json::Value>(&state.tool_use_input_json) {
            Ok(v) => v.to_string(),
            Err(e) => {
                warn!(error = %e, "tool input JSON failed to parse, defaulting to {{}}");
                "{}".to_string()
            }
        }
    } else if let Some(initial) = state.tool_use_initial_input.take() {
        initial.to_string()
    } else {
        "{}".to_string()
    };

    state.tool_calls.push(ToolCallRecord {
        id: std::mem::take(&mut state.tool_use_id),
        name: std::mem::take(&mut state.tool_use_name),
        arguments,
    });
    state.tool_use_input_json.clear();
    state.tool_use_initial_input = None;
}

// Anthropic SSE data types (deserialization only).

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    #[serde(default)]
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
    /// Sometimes carries a complete input object instead of streamed JSON.
    input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    thinking: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut DecodeState, event: &str, data: &str) -> Option<StreamEvent> {
        state.current_event = event.to_string();
        handle_data(state, data)
    }

    #[test]
    fn text_deltas_accumulate() {
        let mut state = DecodeState::default();
        feed(
            &mut state,
            "content_block_start",
            r#"{"content_block":{"type":"text"}}"#,
        );
        let ev = feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"text_delta","text":"Hel"}}"#,
        );
        assert!(matches!(ev, Some(StreamEvent::Content { ref delta }) if delta == "Hel"));
        feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"text_delta","text":"lo"}}"#,
        );
        assert_eq!(state.content, "Hello");
    }

    #[test]
    fn tool_use_accumulates_partial_json() {
        let mut state = DecodeState::default();
        feed(
            &mut state,
            "content_block_start",
            r#"{"content_block":{"type":"tool_use","id":"toolu_1","name":"web_search"}}"#,
        );
        feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#,
        );
        feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"input_json_delta","partial_json":"\"rust\"}"}}"#,
        );
        feed(&mut state, "content_block_stop", "{}");

        assert_eq!(state.tool_calls.len(), 1);
        let call = &state.tool_calls[0];
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.name, "web_search");
        let parsed: serde_json::Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(parsed["query"], "rust");
    }

    #[test]
    fn tool_use_falls_back_to_initial_input() {
        let mut state = DecodeState::default();
        feed(
            &mut state,
            "content_block_start",
            r#"{"content_block":{"type":"tool_use","id":"toolu_2","name":"file_list","input":{"limit":5}}}"#,
        );
        feed(&mut state, "content_block_stop", "{}");
        let parsed: serde_json::Value =
            serde_json::from_str(&state.tool_calls[0].arguments).unwrap();
        assert_eq!(parsed["limit"], 5);
    }

    #[test]
    fn thinking_deltas_route_to_reasoning() {
        let mut state = DecodeState::default();
        feed(
            &mut state,
            "content_block_start",
            r#"{"content_block":{"type":"thinking"}}"#,
        );
        let ev = feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        );
        assert!(matches!(ev, Some(StreamEvent::Reasoning { ref delta }) if delta == "hmm"));
        assert_eq!(state.reasoning, "hmm");
    }

    #[test]
    fn message_delta_captures_usage_and_stop_reason() {
        let mut state = DecodeState::default();
        feed(
            &mut state,
            "message_delta",
            r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":42}}"#,
        );
        assert_eq!(state.tokens_out, 42);
        assert_eq!(state.stop_reason.as_deref(), Some("tool_use"));
    }
}
