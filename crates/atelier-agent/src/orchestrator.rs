//! The ReAct orchestrator: alternate model inference with tool execution
//! until the model stops calling tools or the iteration cap is hit.
//!
//! Turn state machine:
//! `IDLE → REASONING → (TOOL_EXECUTION → REASONING)* → COMPLETED | FAILED`.
//! Every iteration repairs the message list, injects queued images, streams
//! the provider call, then runs the requested tools sequentially in
//! call-list order while heartbeating. New messages persist through the
//! store as they are produced, so a crash leaves at most one dangling
//! tool-call group for the next turn's repair to absorb.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use atelier_core::config::AgentConfig;
use atelier_core::MessageId;
use atelier_store::store::NewMessage;
use atelier_store::{
    ConversationStore, Message, MessageContent, MessageStatus, Role, ToolCallRecord,
};
use atelier_workspace::{filter_previewable, is_url, WorkspaceRoot};

use crate::context::ContextManager;
use crate::events::AgentEvent;
use crate::images;
use crate::provider::{ChatOutcome, ChatRequest, ProviderError};
use crate::repair::repair_messages;
use crate::retry;
use crate::router::ProviderRouter;
use crate::stream::StreamEvent;
use crate::tools::{ToolRegistry, SANDBOX_TOOLS};
use crate::wire::lenient_arguments;

const HEARTBEAT_SECS: u64 = 10;

/// User guidance shown when a turn ends on a content filter.
const CONTENT_FILTER_GUIDANCE: &str = "Your request triggered the provider's content \
safety policy and this turn was terminated.\n\nSuggestions:\n\
• Start a new message and rephrase the request\n\
• Switch to a different model\n\
• Simplify the wording and avoid sensitive phrases";

/// One turn's input.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conv_id: String,
    pub username: Option<String>,
    pub user_input: String,
    pub client_msg_id: Option<String>,
}

pub struct Orchestrator {
    store: Arc<ConversationStore>,
    workspaces: WorkspaceRoot,
    registry: Arc<ToolRegistry>,
    router: Arc<ProviderRouter>,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        workspaces: WorkspaceRoot,
        registry: Arc<ToolRegistry>,
        router: Arc<ProviderRouter>,
        config: AgentConfig,
    ) -> Self {
        Self {
            store,
            workspaces,
            registry,
            router,
            config,
        }
    }

    /// Run one full turn, emitting progress events into `events`. All exits
    /// emit a terminal `final` event.
    pub async fn run_turn(&self, turn: TurnRequest, events: mpsc::Sender<AgentEvent>) {
        if let Err(e) = self.run_turn_inner(&turn, &events).await {
            let _ = events.send(AgentEvent::final_failed(e)).await;
        }
    }

    async fn run_turn_inner(
        &self,
        turn: &TurnRequest,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), String> {
        let conv = self
            .store
            .get(&turn.conv_id, turn.username.as_deref())
            .map_err(|e| e.to_string())?;
        let model = conv.model.clone();
        let output_dir = self
            .store
            .output_dir_name(&turn.conv_id)
            .map_err(|e| e.to_string())?;
        let adapter = self
            .router
            .adapter_for(&model)
            .map_err(|e| e.to_string())?;

        info!(conv_id = %turn.conv_id, model = %model, "turn started");

        // Work on a copy so in-flight mutations never leak to disk early.
        let mut history: Vec<Message> = conv.messages.clone();

        let system_msg = self.build_system_message(&turn.conv_id, &output_dir);
        let user_msg = build_message(
            Role::User,
            MessageContent::text(&turn.user_input),
            None,
            None,
        );

        // Context accounting over what the provider would actually see.
        let ctx_mgr = ContextManager::new(&model, self.config.recent_turns);
        let mut probe: Vec<Message> = Vec::with_capacity(history.len() + 2);
        probe.push(system_msg.clone());
        probe.extend(history.iter().cloned());
        probe.push(user_msg.clone());
        let stats = ctx_mgr.calculate_usage(&probe);
        let _ = events
            .send(AgentEvent::ContextStats {
                stats: stats.clone(),
            })
            .await;

        if stats.should_compress && history.len() > self.config.recent_turns * 2 {
            let _ = events
                .send(AgentEvent::CompressionStart {
                    message: "Conversation history is close to the context window, compressing…"
                        .to_string(),
                    stats: stats.clone(),
                })
                .await;

            match ctx_mgr.compress(&history, adapter.as_ref()).await {
                Some(compressed) => {
                    // Persist the compressed shape so the next turn starts
                    // from it.
                    self.store
                        .replace_messages(
                            &turn.conv_id,
                            compressed.clone(),
                            turn.username.as_deref(),
                        )
                        .map_err(|e| e.to_string())?;
                    history = compressed;

                    let mut probe: Vec<Message> = vec![system_msg.clone()];
                    probe.extend(history.iter().cloned());
                    probe.push(user_msg.clone());
                    let new_stats = ctx_mgr.calculate_usage(&probe);
                    let _ = events
                        .send(AgentEvent::CompressionDone {
                            message: format!(
                                "Compression finished · usage {}% → {}%",
                                stats.usage_percent, new_stats.usage_percent
                            ),
                            old_stats: stats.clone(),
                            new_stats,
                        })
                        .await;
                }
                None => {
                    let _ = events
                        .send(AgentEvent::CompressionFailed {
                            message: "Compression had no effect, keeping the original history"
                                .to_string(),
                            stats: stats.clone(),
                        })
                        .await;
                }
            }
        }

        // Persist the user message (idempotent when a client_msg_id rides
        // along).
        let mut new_user = NewMessage::user(&turn.user_input);
        if let Some(cmid) = &turn.client_msg_id {
            new_user = new_user.with_client_msg_id(cmid.clone());
        }
        self.store
            .append_message(&turn.conv_id, new_user, turn.username.as_deref())
            .map_err(|e| e.to_string())?;

        let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 2);
        messages.push(system_msg);
        messages.extend(history);
        messages.push(user_msg);

        // ── ReAct iterations ────────────────────────────────────────────────
        for iteration in 1..=self.config.max_iterations {
            let _ = events.send(AgentEvent::iter_start(iteration)).await;

            messages = repair_messages(&messages);
            self.inject_pending_images(&turn.conv_id, &output_dir, &mut messages)
                .await;

            let chat_req = ChatRequest {
                model: model.clone(),
                messages: messages.clone(),
                tools: self.registry.function_schemas(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_completion_tokens,
            };

            let (outcome, content_buffer) = match self
                .call_provider(adapter.as_ref(), &chat_req, iteration, events)
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = events
                        .send(AgentEvent::final_failed(format!(
                            "LLM request failed: {e}"
                        )))
                        .await;
                    return Ok(());
                }
            };

            if outcome.is_content_filter() {
                warn!(conv_id = %turn.conv_id, "content filter terminated the turn");
                let _ = events
                    .send(AgentEvent::final_content_filter(
                        CONTENT_FILTER_GUIDANCE.to_string(),
                    ))
                    .await;
                return Ok(());
            }

            if !outcome.has_tool_calls() {
                let final_answer = content_buffer
                    .filter(|c| !c.is_empty())
                    .or(outcome.content)
                    .unwrap_or_default();

                self.store
                    .append_message(
                        &turn.conv_id,
                        NewMessage::assistant(&final_answer),
                        turn.username.as_deref(),
                    )
                    .map_err(|e| e.to_string())?;

                let _ = events.send(AgentEvent::iter_done(iteration, "success")).await;
                let _ = events.send(AgentEvent::final_success(final_answer)).await;
                info!(conv_id = %turn.conv_id, iteration, "turn completed");
                return Ok(());
            }

            // Tool batch: the assistant content accompanies the calls as an
            // out-of-band note.
            let accompanying = content_buffer
                .filter(|c| !c.is_empty())
                .or(outcome.content.clone())
                .unwrap_or_default();
            if !accompanying.is_empty() {
                let _ = events
                    .send(AgentEvent::note(accompanying.clone(), iteration))
                    .await;
            }

            let assistant_msg = self
                .persist_assistant_with_calls(turn, &accompanying, &outcome)
                .map_err(|e| e.to_string())?;
            messages.push(assistant_msg);

            for call in &outcome.tool_calls {
                let tool_msg = self
                    .execute_one_call(turn, &output_dir, call, &accompanying, iteration, events)
                    .await?;
                messages.push(tool_msg);
            }

            let _ = events.send(AgentEvent::iter_done(iteration, "success")).await;
        }

        warn!(
            conv_id = %turn.conv_id,
            cap = self.config.max_iterations,
            "iteration cap reached"
        );
        let _ = events
            .send(AgentEvent::final_failed(
                "The task hit the iteration cap without completing. Please simplify the request and retry.".to_string(),
            ))
            .await;
        Ok(())
    }

    /// Stream one provider call, forwarding thinking/retry events; answer
    /// content is buffered so it can surface as a note (tool turns) or the
    /// final result (answer turns).
    async fn call_provider(
        &self,
        adapter: &dyn crate::provider::ProviderAdapter,
        chat_req: &ChatRequest,
        iteration: u32,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<(ChatOutcome, Option<String>), ProviderError> {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);

        let send_fut = async {
            let result = retry::stream_with_retry(adapter, chat_req, &tx).await;
            drop(tx);
            result
        };

        let forward_fut = async {
            let mut thinking = String::new();
            let mut content = String::new();
            while let Some(ev) = rx.recv().await {
                match ev {
                    StreamEvent::Reasoning { delta } => {
                        thinking.push_str(&delta);
                        let _ = events
                            .send(AgentEvent::thinking(delta, thinking.clone(), iteration))
                            .await;
                    }
                    StreamEvent::Content { delta } => {
                        content.push_str(&delta);
                    }
                    StreamEvent::Retry {
                        attempt,
                        max_retries,
                        delay_secs,
                        reason,
                    } => {
                        let _ = events
                            .send(AgentEvent::Retry {
                                attempt,
                                max_retries,
                                delay: delay_secs,
                                reason,
                            })
                            .await;
                    }
                    StreamEvent::RetryExhausted {
                        attempt,
                        max_retries,
                        reason,
                    } => {
                        let _ = events
                            .send(AgentEvent::RetryExhausted {
                                attempt,
                                max_retries,
                                reason,
                            })
                            .await;
                    }
                    StreamEvent::Error { message } => {
                        debug!(message, "stream-level error");
                    }
                }
            }
            content
        };

        let (result, content) = tokio::join!(send_fut, forward_fut);
        let outcome = result?;
        let buffered = if content.is_empty() { None } else { Some(content) };
        Ok((outcome, buffered))
    }

    fn persist_assistant_with_calls(
        &self,
        turn: &TurnRequest,
        content: &str,
        outcome: &ChatOutcome,
    ) -> Result<Message, atelier_store::StoreError> {
        let mut new_msg = NewMessage::assistant(content).with_tool_calls(outcome.tool_calls.clone());
        new_msg.original_parts = outcome.original_parts.clone();
        self.store
            .append_message(&turn.conv_id, new_msg, turn.username.as_deref())?;

        let mut msg = build_message(
            Role::Assistant,
            MessageContent::text(content),
            Some(outcome.tool_calls.clone()),
            None,
        );
        msg.original_parts = outcome.original_parts.clone();
        Ok(msg)
    }

    /// Execute one tool call: argument normalisation and injection, start /
    /// heartbeat / done events, envelope persistence, artifact and image
    /// propagation. Returns the tool message for the in-memory working list.
    async fn execute_one_call(
        &self,
        turn: &TurnRequest,
        output_dir: &str,
        call: &ToolCallRecord,
        assistant_content: &str,
        iteration: u32,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<Message, String> {
        let tool_name = call.name.as_str();
        let mut args = lenient_arguments(&serde_json::Value::String(call.arguments.clone()));

        // Best-effort rescue: the model sometimes puts the code in its
        // message body instead of the tool arguments.
        if tool_name == "code_executor"
            && args.get("code").is_none()
            && args.get("script_file").is_none()
        {
            if let Some(code) = atelier_sandbox::sanitize::extract_fenced_code(assistant_content) {
                warn!(
                    chars = code.len(),
                    "code argument missing, extracted fenced block from assistant content"
                );
                args["code"] = serde_json::json!(code);
            }
        }

        // Workspace-scoped tools get the real conversation identity; model
        // supplied values are never trusted.
        if SANDBOX_TOOLS.contains(&tool_name) {
            args["conversation_id"] = serde_json::json!(turn.conv_id);
            args["_output_dir_name"] = serde_json::json!(output_dir);
        }

        let args_preview = preview_args(&args);
        let _ = events
            .send(AgentEvent::exec_start(iteration, tool_name, args_preview))
            .await;

        let started = Instant::now();
        let invoke_fut = self.registry.invoke(tool_name, args);
        tokio::pin!(invoke_fut);

        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
        heartbeat.tick().await; // the first tick is immediate

        let envelope = loop {
            tokio::select! {
                env = &mut invoke_fut => break env,
                _ = heartbeat.tick() => {
                    let _ = events
                        .send(AgentEvent::exec_heartbeat(
                            iteration,
                            tool_name,
                            started.elapsed().as_secs(),
                        ))
                        .await;
                }
            }
        };

        let elapsed = started.elapsed().as_secs();
        if envelope.success {
            let _ = events
                .send(AgentEvent::exec_done(iteration, tool_name, elapsed))
                .await;

            if tool_name == "create_plan" {
                if let Some(data) = &envelope.data {
                    if let Some(plan) = data.get("plan") {
                        let _ = events
                            .send(AgentEvent::PlanUpdate {
                                plan: plan.clone(),
                                summary: data
                                    .get("summary")
                                    .and_then(|s| s.as_str())
                                    .map(String::from),
                            })
                            .await;
                    }
                }
            }
        } else {
            let _ = events
                .send(AgentEvent::exec_error(
                    iteration,
                    tool_name,
                    envelope
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "execution failed".to_string()),
                    elapsed,
                ))
                .await;
        }

        // Persist the envelope as the tool message.
        let result_text = envelope.to_message_text();
        let mut new_tool_msg = NewMessage::tool(&call.id, tool_name, &result_text);
        new_tool_msg.generated_files = envelope.generated_files.clone();
        self.store
            .append_message(&turn.conv_id, new_tool_msg, turn.username.as_deref())
            .map_err(|e| e.to_string())?;

        // Announce artifacts the client can actually show.
        if !envelope.generated_files.is_empty() {
            let existing: Vec<String> = envelope
                .generated_files
                .iter()
                .filter(|f| is_url(f) || self.workspaces.file_exists(output_dir, f))
                .cloned()
                .collect();
            let previewable = filter_previewable(&existing);
            if !previewable.is_empty() {
                let _ = events
                    .send(AgentEvent::files_generated(iteration, previewable))
                    .await;
            }
        }

        // Tool-requested image injection feeds the pending queue.
        if !envelope.inject_images.is_empty() {
            if let Err(e) = self.store.add_pending_images(
                &turn.conv_id,
                &envelope.inject_images,
                envelope.image_detail,
                1,
            ) {
                warn!(error = %e, "failed to queue injected images");
            } else {
                let _ = events
                    .send(AgentEvent::exec_files(
                        iteration,
                        tool_name,
                        envelope.inject_images.clone(),
                    ))
                    .await;
            }
        }

        let mut msg = build_message(
            Role::Tool,
            MessageContent::text(result_text),
            None,
            Some((call.id.clone(), tool_name.to_string())),
        );
        msg.generated_files = envelope.generated_files;
        Ok(msg)
    }

    /// Materialise the pending-image queue into a user message placed after
    /// the last tool message (or at the tail), then consume view counts.
    async fn inject_pending_images(
        &self,
        conv_id: &str,
        output_dir: &str,
        messages: &mut Vec<Message>,
    ) {
        let pending = match self.store.pending_images(conv_id) {
            Ok(p) if !p.is_empty() => p,
            _ => return,
        };
        let Ok(workspace_dir) = self.workspaces.workspace_dir(output_dir) else {
            return;
        };
        let Some(content) = images::build_injection_content(&pending, &workspace_dir) else {
            return;
        };

        let image_msg = build_message(Role::User, content, None, None);
        let insert_at = messages
            .iter()
            .rposition(|m| m.role == Role::Tool)
            .map(|i| i + 1)
            .unwrap_or(messages.len());
        messages.insert(insert_at, image_msg);

        match self.store.decrement_views_and_cleanup(conv_id) {
            Ok(removed) if removed > 0 => {
                debug!(removed, "evicted exhausted pending images");
            }
            Err(e) => warn!(error = %e, "pending image cleanup failed"),
            _ => {}
        }
    }

    fn build_system_message(&self, conv_id: &str, output_dir: &str) -> Message {
        let workspace_files = self
            .workspaces
            .workspace_dir(output_dir)
            .ok()
            .and_then(|dir| std::fs::read_dir(dir).ok())
            .map(|entries| {
                let mut files: Vec<(std::time::SystemTime, String)> = entries
                    .flatten()
                    .filter(|e| e.path().is_file())
                    .filter_map(|e| {
                        let name = e.file_name().to_str()?.to_string();
                        let mtime = e.metadata().ok()?.modified().ok()?;
                        Some((mtime, name))
                    })
                    .collect();
                files.sort_by(|a, b| b.0.cmp(&a.0));
                files
                    .into_iter()
                    .take(20)
                    .map(|(_, name)| format!("- {name}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "- (empty)".to_string());

        let tool_list = self
            .registry
            .names()
            .iter()
            .map(|n| format!("- {n}"))
            .collect::<Vec<_>>()
            .join("\n");

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();

        let prompt = format!(
            "You are Atelier, a creative workflow automation assistant.\n\n\
             ## Capabilities\n\
             - information retrieval and research\n\
             - data analysis and visualisation\n\
             - file management and editing\n\
             - code execution in an isolated workspace\n\n\
             ## Environment\n\
             Current time: {now}\n\
             Conversation id: {conv_id}\n\
             Workspace: outputs/{output_dir}/\n\
             Recent files (up to 20):\n{workspace_files}\n\n\
             ## Tools\n{tool_list}\n\n\
             ## Working rules\n\
             - Save every generated file with a bare filename (chart.png, \
               report.xlsx); never use directory prefixes, the system manages \
               storage.\n\
             - Reference files in replies by filename only.\n\
             - Short code (< 50 lines): use code_executor's inline `code`. \
               Longer programs: save with file_writer, then run via \
               `script_file` so they stay editable.\n\
             - Import moviepy as `moviepy.editor` (not `moviepy.edit`)."
        );

        build_message(Role::System, MessageContent::text(prompt), None, None)
    }
}

fn build_message(
    role: Role,
    content: MessageContent,
    tool_calls: Option<Vec<ToolCallRecord>>,
    tool_ref: Option<(String, String)>,
) -> Message {
    let now = atelier_core::types::now_stored();
    let (tool_call_id, name) = match tool_ref {
        Some((id, name)) => (Some(id), Some(name)),
        None => (None, None),
    };
    Message {
        id: MessageId::new(),
        role,
        content,
        created_at: now.clone(),
        updated_at: now,
        status: MessageStatus::Completed,
        tool_calls: tool_calls.filter(|c| !c.is_empty()),
        original_parts: None,
        tool_call_id,
        name,
        client_msg_id: None,
        generated_files: Vec::new(),
        extra: Default::default(),
    }
}

fn preview_args(args: &serde_json::Value) -> String {
    let rendered = args.to_string();
    if rendered.chars().count() > 80 {
        let head: String = rendered.chars().take(80).collect();
        format!("{head}...")
    } else {
        rendered
    }
}
