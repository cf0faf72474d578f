//! Context accounting and compression.
//!
//! Token counts are estimated with the character heuristic
//! `cjk_chars / 1.5 + other_chars / 4` (a locally cached BPE encoder would
//! slot in behind [`estimate_message_tokens`], but none is bundled). When
//! usage crosses the threshold, the old prefix of the history is folded,
//! cleared and summarised into a single synthetic system message while the
//! most recent turns stay verbatim.

use serde::Serialize;
use tracing::{info, warn};

use atelier_core::MessageId;
use atelier_store::{Message, MessageContent, MessageStatus, Role};

use crate::provider::{ChatRequest, ProviderAdapter};

/// Usage fraction that triggers compression.
pub const COMPRESSION_THRESHOLD: f64 = 0.85;

/// Tool results longer than this are rewritten to a terse summary.
const CLEAR_THRESHOLD_CHARS: usize = 200;

/// Minimum run length before consecutive same-tool results are folded.
const FOLD_MIN_RUN: usize = 3;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextStats {
    pub total_tokens: u64,
    pub max_tokens: u64,
    pub usage_percent: f64,
    pub available_tokens: i64,
    pub should_compress: bool,
}

/// Infer the context window from the model name.
pub fn infer_window(model: &str) -> u64 {
    let lower = model.to_lowercase();

    if lower.contains("claude") {
        return 200_000;
    }
    if lower.contains("gemini")
        && (lower.contains("1.5")
            || lower.contains('3')
            || lower.contains("pro")
            || lower.contains("flash"))
    {
        return 1_000_000;
    }
    if lower.contains("gpt-4-turbo")
        || lower.contains("gpt-4o")
        || lower.contains("gpt-4-0125")
        || lower.contains("gpt-4-1106")
    {
        return 128_000;
    }
    if lower.contains("gpt-4-32k") {
        return 32_000;
    }
    if lower.contains("gpt-4") {
        return 8_000;
    }
    if lower.contains("glm-4") || lower.contains("deepseek") {
        return 128_000;
    }
    128_000
}

/// Heuristic token estimate for one message: content text plus serialized
/// tool calls plus the tool name.
pub fn estimate_message_tokens(msg: &Message) -> u64 {
    let mut text = msg.content.as_text();
    if let Some(calls) = &msg.tool_calls {
        for call in calls {
            text.push_str(&call.name);
            text.push_str(&call.arguments);
        }
    }
    if let Some(name) = &msg.name {
        text.push_str(name);
    }
    estimate_text_tokens(&text)
}

pub fn estimate_text_tokens(text: &str) -> u64 {
    let total = text.chars().count() as f64;
    let cjk = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count() as f64;
    (cjk / 1.5 + (total - cjk) / 4.0) as u64
}

pub struct ContextManager {
    model: String,
    window: u64,
    recent_turns: usize,
}

impl ContextManager {
    pub fn new(model: &str, recent_turns: usize) -> Self {
        let window = infer_window(model);
        info!(model, window, "context manager initialised");
        Self {
            model: model.to_string(),
            window,
            recent_turns,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn calculate_usage(&self, messages: &[Message]) -> ContextStats {
        let total: u64 = messages.iter().map(estimate_message_tokens).sum();
        let usage_percent = (total as f64 / self.window as f64) * 100.0;
        ContextStats {
            total_tokens: total,
            max_tokens: self.window,
            usage_percent: (usage_percent * 100.0).round() / 100.0,
            available_tokens: self.window as i64 - total as i64,
            should_compress: usage_percent >= COMPRESSION_THRESHOLD * 100.0,
        }
    }

    /// Whether compression should run for this history: over the usage
    /// threshold AND long enough that a preserved-recent window remains.
    pub fn should_compress(&self, messages: &[Message]) -> bool {
        self.calculate_usage(messages).should_compress
            && messages.len() > self.recent_turns * 2
    }

    /// Compress the history. Returns `None` when compression did not apply
    /// or did not help (empty summary, or no token reduction) — the caller
    /// keeps the original in that case.
    pub async fn compress(
        &self,
        history: &[Message],
        adapter: &dyn ProviderAdapter,
    ) -> Option<Vec<Message>> {
        if history.len() <= self.recent_turns * 2 {
            return None;
        }

        let split = history.len() - self.recent_turns * 2;
        let (old, recent) = history.split_at(split);

        let folded = fold_consecutive_tool_calls(old);
        let cleared = clear_long_tool_results(&folded);

        let summary = self.generate_summary(&cleared, adapter).await?;

        let now = atelier_core::types::now_stored();
        let summary_msg = Message {
            id: MessageId::new(),
            role: Role::System,
            content: MessageContent::text(format!(
                "[Conversation summary — automatically compressed]\n\n{summary}\n\n---\n\n[Recent messages follow]"
            )),
            created_at: now.clone(),
            updated_at: now,
            status: MessageStatus::Completed,
            tool_calls: None,
            original_parts: None,
            tool_call_id: None,
            name: None,
            client_msg_id: None,
            generated_files: vec![],
            extra: Default::default(),
        };

        let mut compressed = vec![summary_msg];
        compressed.extend_from_slice(recent);

        let before = self.calculate_usage(history);
        let after = self.calculate_usage(&compressed);
        if after.total_tokens >= before.total_tokens {
            warn!(
                before = before.total_tokens,
                after = after.total_tokens,
                "compression did not reduce token count, keeping original history"
            );
            return None;
        }

        info!(
            messages_before = history.len(),
            messages_after = compressed.len(),
            tokens_before = before.total_tokens,
            tokens_after = after.total_tokens,
            "history compressed"
        );
        Some(compressed)
    }

    async fn generate_summary(
        &self,
        old: &[Message],
        adapter: &dyn ProviderAdapter,
    ) -> Option<String> {
        let transcript = format_for_summary(old);
        if transcript.trim().is_empty() {
            return None;
        }

        let prompt_msg = Message {
            id: MessageId::new(),
            role: Role::User,
            content: MessageContent::text(build_compression_prompt(&transcript)),
            created_at: atelier_core::types::now_stored(),
            updated_at: atelier_core::types::now_stored(),
            status: MessageStatus::Completed,
            tool_calls: None,
            original_parts: None,
            tool_call_id: None,
            name: None,
            client_msg_id: None,
            generated_files: vec![],
            extra: Default::default(),
        };

        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![prompt_msg],
            tools: vec![],
            temperature: 0.3,
            max_tokens: 1024,
        };

        match adapter.send(&req).await {
            Ok(outcome) => {
                let summary = outcome.content.unwrap_or_default().trim().to_string();
                if summary.is_empty() {
                    warn!("summary generation returned empty content");
                    None
                } else {
                    Some(summary)
                }
            }
            Err(e) => {
                warn!(error = %e, "summary generation failed");
                None
            }
        }
    }
}

/// Fold ≥3 consecutive tool results of the same tool: web-search runs
/// collapse to one synthetic status message, code-executor runs keep only
/// the last entry, other tools stay untouched.
pub fn fold_consecutive_tool_calls(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::new();
    let mut buffer: Vec<Message> = Vec::new();

    let flush = |buffer: &mut Vec<Message>, out: &mut Vec<Message>| {
        if buffer.is_empty() {
            return;
        }
        let run = std::mem::take(buffer);
        out.extend(process_tool_run(run));
    };

    for msg in messages {
        if msg.role == Role::Tool {
            if buffer.is_empty() || buffer[0].name == msg.name {
                buffer.push(msg.clone());
            } else {
                flush(&mut buffer, &mut out);
                buffer.push(msg.clone());
            }
        } else {
            flush(&mut buffer, &mut out);
            out.push(msg.clone());
        }
    }
    flush(&mut buffer, &mut out);
    out
}

fn process_tool_run(run: Vec<Message>) -> Vec<Message> {
    if run.len() < FOLD_MIN_RUN {
        return run;
    }

    match run[0].name.as_deref() {
        Some("web_search") => {
            let total = run.len();
            let successful = run
                .iter()
                .filter(|m| {
                    serde_json::from_str::<serde_json::Value>(&m.content.as_text())
                        .ok()
                        .and_then(|v| v.get("status").map(|s| s == "success"))
                        .unwrap_or(false)
                })
                .count();

            let mut summary = run.last().cloned().expect("run is non-empty");
            summary.content = MessageContent::text(
                serde_json::json!({
                    "status": "summary",
                    "data": {
                        "tool": "web_search",
                        "total_calls": total,
                        "successful": successful,
                        "failed": total - successful,
                        "note": format!(
                            "{total} searches executed, {successful} succeeded. Detailed results compressed to save context."
                        ),
                    }
                })
                .to_string(),
            );
            vec![summary]
        }
        Some("code_executor") => {
            vec![run.last().cloned().expect("run is non-empty")]
        }
        _ => run,
    }
}

/// Rewrite long tool results to a terse summary: structured JSON keeps its
/// status, first files and truncated error; anything else is truncated with
/// a `[Compressed: N chars]` prefix.
pub fn clear_long_tool_results(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| {
            if msg.role != Role::Tool {
                return msg.clone();
            }
            let content = msg.content.as_text();
            if content.chars().count() < CLEAR_THRESHOLD_CHARS {
                return msg.clone();
            }

            let summary = match serde_json::from_str::<serde_json::Value>(&content) {
                Ok(data) => {
                    let mut parts: Vec<String> = Vec::new();
                    if let Some(status) = data.get("status").and_then(|v| v.as_str()) {
                        parts.push(format!("Status: {status}"));
                    }
                    if let Some(files) = data.get("generated_files").and_then(|v| v.as_array()) {
                        let names: Vec<&str> =
                            files.iter().filter_map(|f| f.as_str()).take(3).collect();
                        if !names.is_empty() {
                            parts.push(format!("Files: {}", names.join(", ")));
                        }
                    }
                    if let Some(error) = data.get("error").and_then(|v| v.as_str()) {
                        parts.push(format!("Error: {}", truncate_chars(error, 100)));
                    }
                    if parts.is_empty() {
                        truncate_chars(&content, 150)
                    } else {
                        parts.join(" | ")
                    }
                }
                Err(_) => format!("{}...", truncate_chars(&content, CLEAR_THRESHOLD_CHARS)),
            };

            let mut cleared = msg.clone();
            cleared.content = MessageContent::text(format!(
                "[Compressed: {} chars] {summary}",
                content.chars().count()
            ));
            cleared
        })
        .collect()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn format_for_summary(messages: &[Message]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for msg in messages {
        let text = msg.content.as_text();
        if text.is_empty() {
            continue;
        }
        lines.push(format!("{}: {}", msg.role.to_string().to_uppercase(), text));
    }
    lines.join("\n\n")
}

fn build_compression_prompt(transcript: &str) -> String {
    format!(
        "You are a conversation-history compressor. Reduce the transcript \
         below to the smallest high-signal summary that preserves working \
         context.\n\n\
         Keep: the core task, completed work (with filenames and key \
         parameters), unresolved problems, key decisions with their reasons, \
         and explicit user preferences. Discard: redundant tool output, \
         intermediate reasoning, and pleasantries.\n\n\
         Output format:\n\n\
         [Core task]\n(one sentence)\n\n\
         [Completed]\n- item: result (files, parameters)\n\n\
         [Pending]\n- issue: status\n\n\
         [Key decisions]\n- choice: reason\n\n\
         [Important files]\n- file.ext: purpose\n\n\
         ---\n\n\
         Transcript to compress:\n\n{transcript}\n\n\
         ---\n\n\
         Produce the summary now (aim for 200-500 tokens)."
    )
}
