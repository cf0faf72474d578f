//! End-to-end turns against a scripted provider adapter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use atelier_agent::events::{AgentEvent, ExecPhase, FinalStatus};
use atelier_agent::orchestrator::{Orchestrator, TurnRequest};
use atelier_agent::provider::{ChatOutcome, ChatRequest, ProviderAdapter, ProviderError};
use atelier_agent::router::ProviderRouter;
use atelier_agent::stream::StreamEvent;
use atelier_agent::tools::{ToolContext, ToolRegistry};
use atelier_core::config::AgentConfig;
use atelier_sandbox::SandboxRunner;
use atelier_store::{ConversationStore, MessageContent, Role, ToolCallRecord};
use atelier_workspace::WorkspaceRoot;

#[derive(Clone)]
enum Scripted {
    Answer(&'static str),
    ToolCall {
        name: &'static str,
        arguments: &'static str,
    },
    RateLimited,
    ContentFilter,
}

struct ScriptedAdapter {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedAdapter {
    fn new(steps: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatOutcome, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Answer("done"));

        match step {
            Scripted::Answer(text) => {
                let _ = tx
                    .send(StreamEvent::Content {
                        delta: text.to_string(),
                    })
                    .await;
                Ok(ChatOutcome {
                    content: Some(text.to_string()),
                    finish_reason: Some("stop".to_string()),
                    ..Default::default()
                })
            }
            Scripted::ToolCall { name, arguments } => Ok(ChatOutcome {
                content: Some("Working on it.".to_string()),
                tool_calls: vec![ToolCallRecord {
                    id: format!("call_{name}"),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
                finish_reason: Some("tool_use".to_string()),
                ..Default::default()
            }),
            Scripted::RateLimited => Err(ProviderError::RateLimited {
                retry_after_ms: None,
            }),
            Scripted::ContentFilter => Ok(ChatOutcome {
                content: Some("[system notice] filtered".to_string()),
                finish_reason: Some("content_filter".to_string()),
                ..Default::default()
            }),
        }
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    store: Arc<ConversationStore>,
    workspaces: WorkspaceRoot,
    orchestrator: Orchestrator,
    adapter: Arc<ScriptedAdapter>,
}

fn harness(steps: Vec<Scripted>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ConversationStore::open(
            tmp.path().join("data/conversations"),
            tmp.path().join("outputs"),
        )
        .unwrap(),
    );
    let workspaces = WorkspaceRoot::new(tmp.path().join("outputs"));
    let adapter = ScriptedAdapter::new(steps);
    let router = Arc::new(ProviderRouter::from_adapters(
        Some(adapter.clone()),
        None,
        None,
    ));
    let ctx = Arc::new(ToolContext {
        store: store.clone(),
        workspaces: workspaces.clone(),
        runner: SandboxRunner::new(None),
        code_timeout_secs: 30,
        shell_timeout_secs: 30,
        http: reqwest::Client::new(),
        search_api_key: None,
    });
    let registry = Arc::new(ToolRegistry::with_builtin_tools(ctx));
    let orchestrator = Orchestrator::new(
        store.clone(),
        workspaces.clone(),
        registry,
        router,
        AgentConfig::default(),
    );
    Harness {
        _tmp: tmp,
        store,
        workspaces,
        orchestrator,
        adapter,
    }
}

async fn run_turn(h: &Harness, conv_id: &str, input: &str) -> Vec<AgentEvent> {
    let (tx, mut rx) = mpsc::channel(256);
    h.orchestrator
        .run_turn(
            TurnRequest {
                conv_id: conv_id.to_string(),
                username: None,
                user_input: input.to_string(),
                client_msg_id: None,
            },
            tx,
        )
        .await;
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

fn final_status(events: &[AgentEvent]) -> Option<FinalStatus> {
    events.iter().rev().find_map(|ev| match ev {
        AgentEvent::Final { result } => Some(result.status),
        _ => None,
    })
}

#[tokio::test]
async fn simple_answer_turn() {
    let h = harness(vec![Scripted::Answer("2 + 2 = 4")]);
    let meta = h.store.create("gpt-5", None).unwrap();

    let events = run_turn(&h, meta.id.as_str(), "What is 2+2?").await;

    // Ordering: context_stats first, then iter_start, then the terminals.
    assert!(matches!(events[0], AgentEvent::ContextStats { .. }));
    assert!(matches!(events[1], AgentEvent::IterStart { iter: 1, .. }));
    assert!(events
        .iter()
        .any(|ev| matches!(ev, AgentEvent::IterDone { iter: 1, ref status, .. } if status == "success")));

    let final_ev = events.last().unwrap();
    match final_ev {
        AgentEvent::Final { result } => {
            assert_eq!(result.status, FinalStatus::Success);
            assert!(result.result.as_deref().unwrap().contains('4'));
        }
        other => panic!("expected final event, got {other:?}"),
    }

    let conv = h.store.get(meta.id.as_str(), None).unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[0].role, Role::User);
    assert_eq!(conv.messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn tool_call_turn_writes_artifact() {
    let h = harness(vec![
        Scripted::ToolCall {
            name: "file_writer",
            arguments: r#"{"filename": "hello.txt", "content": "hi"}"#,
        },
        Scripted::Answer("The file hello.txt now contains 'hi'."),
    ]);
    let meta = h.store.create("gpt-5", None).unwrap();

    let events = run_turn(&h, meta.id.as_str(), "Write hello.txt containing hi").await;

    let exec_phases: Vec<ExecPhase> = events
        .iter()
        .filter_map(|ev| match ev {
            AgentEvent::Exec { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(exec_phases, vec![ExecPhase::Start, ExecPhase::Done]);

    assert!(events.iter().any(|ev| matches!(
        ev,
        AgentEvent::FilesGenerated { files, .. } if files == &vec!["hello.txt".to_string()]
    )));
    assert_eq!(final_status(&events), Some(FinalStatus::Success));

    // The artifact really exists in the workspace.
    let ws = h.workspaces.workspace_dir(&meta.output_dir).unwrap();
    assert_eq!(std::fs::read_to_string(ws.join("hello.txt")).unwrap(), "hi");

    // Stored shape: user, assistant-with-calls, tool, assistant.
    let conv = h.store.get(meta.id.as_str(), None).unwrap();
    let roles: Vec<Role> = conv.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert!(conv.messages[1].tool_calls.is_some());
    assert_eq!(
        conv.messages[2].generated_files,
        vec!["hello.txt".to_string()]
    );
}

#[tokio::test]
async fn interrupted_turn_is_repaired_before_the_provider_call() {
    use atelier_store::store::NewMessage;

    let h = harness(vec![Scripted::Answer("fresh start")]);
    let meta = h.store.create("gpt-5", None).unwrap();

    // A crash left an assistant with tool_calls but no tool results.
    h.store
        .append_message(meta.id.as_str(), NewMessage::user("run something"), None)
        .unwrap();
    h.store
        .append_message(
            meta.id.as_str(),
            NewMessage::new(Role::Assistant, MessageContent::text("")).with_tool_calls(vec![
                ToolCallRecord {
                    id: "call_lost".into(),
                    name: "code_executor".into(),
                    arguments: "{}".into(),
                },
            ]),
            None,
        )
        .unwrap();

    let events = run_turn(&h, meta.id.as_str(), "never mind, say hi").await;
    assert_eq!(final_status(&events), Some(FinalStatus::Success));

    // The provider saw no dangling tool_calls — the group was stripped and
    // the content replaced by the placeholder.
    let requests = h.adapter.recorded_requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0].messages;
    let broken = sent
        .iter()
        .find(|m| m.role == Role::Assistant)
        .expect("assistant message present");
    assert!(broken.tool_calls.is_none());
    assert_eq!(broken.content.as_text(), "(tool call in progress)");
}

#[tokio::test]
async fn content_filter_terminates_without_persisting_assistant() {
    let h = harness(vec![Scripted::ContentFilter]);
    let meta = h.store.create("gpt-5", None).unwrap();

    let events = run_turn(&h, meta.id.as_str(), "something spicy").await;
    assert_eq!(final_status(&events), Some(FinalStatus::ContentFilter));

    // No retry events: content filter bypasses the retry path.
    assert!(!events.iter().any(|ev| matches!(ev, AgentEvent::Retry { .. })));

    // Only the user message was persisted; a follow-up turn starts cleanly.
    let conv = h.store.get(meta.id.as_str(), None).unwrap();
    assert_eq!(conv.messages.len(), 1);
    assert_eq!(conv.messages[0].role, Role::User);

    let events = run_turn(&h, meta.id.as_str(), "ok, something tame").await;
    assert_eq!(final_status(&events), Some(FinalStatus::Success));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_retries_then_succeeds() {
    let h = harness(vec![Scripted::RateLimited, Scripted::Answer("recovered")]);
    let meta = h.store.create("gpt-5", None).unwrap();

    let events = run_turn(&h, meta.id.as_str(), "hello").await;

    let retry = events
        .iter()
        .find_map(|ev| match ev {
            AgentEvent::Retry { attempt, delay, .. } => Some((*attempt, *delay)),
            _ => None,
        })
        .expect("a retry event was emitted");
    assert_eq!(retry.0, 1);
    assert!(retry.1 >= 2.0, "429 backoff starts at 2s, got {}", retry.1);

    assert_eq!(final_status(&events), Some(FinalStatus::Success));
    // Exactly one extra outbound attempt.
    assert_eq!(h.adapter.recorded_requests().len(), 2);
}

#[tokio::test]
async fn compression_fires_when_the_window_fills() {
    use atelier_store::store::NewMessage;

    // First scripted response answers the summary request, the second is the
    // turn's actual completion.
    let h = harness(vec![
        Scripted::Answer("[Core task] long-running analysis, earlier steps condensed."),
        Scripted::Answer("Continuing from the summary."),
    ]);
    // gpt-4 resolves to an 8K window, so ~2KB pairs overflow quickly.
    let meta = h.store.create("gpt-4", None).unwrap();

    for i in 0..50 {
        h.store
            .append_message(
                meta.id.as_str(),
                NewMessage::user(&format!("question {i}: {}", "x".repeat(2000))),
                None,
            )
            .unwrap();
        h.store
            .append_message(
                meta.id.as_str(),
                NewMessage::assistant(&format!("answer {i}: {}", "y".repeat(2000))),
                None,
            )
            .unwrap();
    }

    let events = run_turn(&h, meta.id.as_str(), "and now?").await;

    assert!(events
        .iter()
        .any(|ev| matches!(ev, AgentEvent::CompressionStart { .. })));
    let (old_pct, new_pct) = events
        .iter()
        .find_map(|ev| match ev {
            AgentEvent::CompressionDone {
                old_stats,
                new_stats,
                ..
            } => Some((old_stats.usage_percent, new_stats.usage_percent)),
            _ => None,
        })
        .expect("compression completed");
    assert!(new_pct < old_pct);
    assert_eq!(final_status(&events), Some(FinalStatus::Success));

    // Stored shape: synthetic summary + the 6 preserved recent messages +
    // this turn's user and assistant.
    let conv = h.store.get(meta.id.as_str(), None).unwrap();
    assert_eq!(conv.messages.len(), 9);
    assert_eq!(conv.messages[0].role, Role::System);
    assert!(conv.messages[0]
        .content
        .as_text()
        .contains("Conversation summary"));
    assert_eq!(conv.messages[7].role, Role::User);
    assert_eq!(conv.messages[7].content.as_text(), "and now?");
    assert_eq!(conv.messages[8].role, Role::Assistant);
}

#[tokio::test]
async fn pending_images_materialize_into_the_request() {
    use atelier_store::ImageDetail;

    let h = harness(vec![Scripted::Answer("I looked at the chart.")]);
    let meta = h.store.create("gpt-5", None).unwrap();

    // Drop a real image into the workspace and queue it.
    let ws = h.workspaces.workspace_dir(&meta.output_dir).unwrap();
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]));
    img.save(ws.join("chart.png")).unwrap();
    h.store
        .add_pending_images(
            meta.id.as_str(),
            &["chart.png".to_string()],
            ImageDetail::Low,
            1,
        )
        .unwrap();

    let events = run_turn(&h, meta.id.as_str(), "what does the chart show?").await;
    assert_eq!(final_status(&events), Some(FinalStatus::Success));

    let requests = h.adapter.recorded_requests();
    let has_image_part = requests[0].messages.iter().any(|m| {
        matches!(&m.content, MessageContent::Parts(parts) if parts.iter().any(|p| {
            matches!(p, atelier_store::ContentPart::Image { media_type, .. } if media_type == "image/jpeg")
        }))
    });
    assert!(has_image_part, "the queued image rode along in the request");

    // One view consumed: the queue is now empty.
    assert!(h.store.pending_images(meta.id.as_str()).unwrap().is_empty());
}
