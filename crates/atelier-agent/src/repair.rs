//! Message-list repair, run before every provider call.
//!
//! The providers hard-require that an assistant message carrying tool calls
//! is followed by all matching tool results before the next user/assistant
//! message. A user message sent mid-execution, or a crash between the
//! assistant persist and the tool persists, breaks that shape. Repair
//! restores it in two passes:
//!
//! 1. Find incomplete tool-call groups (any call id without a response in
//!    its window). Partial completion is never kept — the whole group
//!    survives or the whole group goes.
//! 2. Rebuild the list: strip `tool_calls` from assistants in incomplete
//!    groups (other fields, including opaque provider parts, are kept; an
//!    empty content gets a placeholder), drop their tool responses, and drop
//!    orphan tool messages whose id is not currently expected.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use atelier_store::{Message, MessageContent, Role};

/// Placeholder content for an assistant whose tool calls were stripped.
pub const TOOL_CALL_IN_PROGRESS: &str = "(tool call in progress)";

pub fn repair_messages(messages: &[Message]) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    // Pass 1: collect the call ids of every incomplete group.
    let mut incomplete_ids: HashSet<String> = HashSet::new();

    for (i, msg) in messages.iter().enumerate() {
        let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) else {
            continue;
        };
        if msg.role != Role::Assistant {
            continue;
        }

        let call_ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        let mut found: HashSet<&str> = HashSet::new();

        for next in &messages[i + 1..] {
            match next.role {
                Role::Tool => {
                    if let Some(id) = next.tool_call_id.as_deref() {
                        if call_ids.contains(id) {
                            found.insert(id);
                        }
                    }
                }
                Role::User | Role::Assistant => break,
                Role::System => {}
            }
        }

        if found.len() < call_ids.len() {
            warn!(
                index = i,
                expected = call_ids.len(),
                found = found.len(),
                "incomplete tool-call group, removing whole group"
            );
            incomplete_ids.extend(call_ids.iter().map(|s| s.to_string()));
        }
    }

    // Pass 2: rebuild a clean list.
    let mut fixed: Vec<Message> = Vec::new();
    let mut expected: HashSet<String> = HashSet::new();

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                let has_incomplete = msg
                    .tool_calls
                    .as_ref()
                    .map(|calls| calls.iter().any(|c| incomplete_ids.contains(&c.id)))
                    .unwrap_or(false);

                if has_incomplete {
                    let mut cleaned = msg.clone();
                    cleaned.tool_calls = None;
                    if cleaned.content.as_text().trim().is_empty() {
                        cleaned.content = MessageContent::text(TOOL_CALL_IN_PROGRESS);
                    }
                    fixed.push(cleaned);
                    expected.clear();
                } else if let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                    expected = calls.iter().map(|c| c.id.clone()).collect();
                    fixed.push(msg.clone());
                } else {
                    expected.clear();
                    fixed.push(msg.clone());
                }
            }

            Role::Tool => {
                let id = msg.tool_call_id.clone().unwrap_or_default();
                if incomplete_ids.contains(&id) {
                    debug!(tool_call_id = %id, "dropping tool response of incomplete group");
                } else if !expected.remove(&id) {
                    warn!(tool_call_id = %id, "dropping orphan tool message");
                } else {
                    fixed.push(msg.clone());
                }
            }

            Role::User => {
                expected.clear();
                fixed.push(msg.clone());
            }

            Role::System => {
                fixed.push(msg.clone());
            }
        }
    }

    if fixed.len() != messages.len() {
        info!(
            before = messages.len(),
            after = fixed.len(),
            "message repair removed inconsistent entries"
        );
    }
    fixed
}
