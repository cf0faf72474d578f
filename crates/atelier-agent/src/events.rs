//! Progress events emitted by the orchestrator toward the transport layer.
//!
//! Each event serialises as a JSON object with a `type` discriminator. The
//! per-iteration ordering guarantee is: `iter_start` → `thinking*` →
//! `content*` → `exec(start)` → `exec(heartbeat|done|error)` →
//! `files_generated?` → … → `iter_done` → `final`.

use serde::Serialize;

use crate::context::ContextStats;

fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ContextStats {
        stats: ContextStats,
    },
    CompressionStart {
        message: String,
        stats: ContextStats,
    },
    CompressionDone {
        message: String,
        old_stats: ContextStats,
        new_stats: ContextStats,
    },
    CompressionFailed {
        message: String,
        stats: ContextStats,
    },
    IterStart {
        iter: u32,
        ts: f64,
    },
    IterDone {
        iter: u32,
        status: String,
        ts: f64,
    },
    Thinking {
        delta: String,
        full_content: String,
        iter: u32,
        ts: f64,
    },
    Note {
        delta: String,
        iter: u32,
        ts: f64,
    },
    Exec {
        iter: u32,
        phase: ExecPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_sec: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
        ts: f64,
    },
    FilesGenerated {
        iter: u32,
        files: Vec<String>,
        ts: f64,
    },
    PlanUpdate {
        plan: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Retry {
        attempt: u32,
        max_retries: u32,
        delay: f64,
        reason: String,
    },
    RetryExhausted {
        attempt: u32,
        max_retries: u32,
        reason: String,
    },
    Final {
        result: FinalResult,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecPhase {
    Start,
    Heartbeat,
    Done,
    Error,
    Files,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Success,
    Failed,
    ContentFilter,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    pub status: FinalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentEvent {
    pub fn iter_start(iter: u32) -> Self {
        AgentEvent::IterStart { iter, ts: now_ts() }
    }

    pub fn iter_done(iter: u32, status: &str) -> Self {
        AgentEvent::IterDone {
            iter,
            status: status.to_string(),
            ts: now_ts(),
        }
    }

    pub fn thinking(delta: String, full_content: String, iter: u32) -> Self {
        AgentEvent::Thinking {
            delta,
            full_content,
            iter,
            ts: now_ts(),
        }
    }

    pub fn note(delta: String, iter: u32) -> Self {
        AgentEvent::Note {
            delta,
            iter,
            ts: now_ts(),
        }
    }

    pub fn exec_start(iter: u32, tool: &str, args_preview: String) -> Self {
        AgentEvent::Exec {
            iter,
            phase: ExecPhase::Start,
            tool: Some(tool.to_string()),
            args_preview: Some(args_preview),
            elapsed_sec: None,
            message: None,
            success: None,
            files: None,
            ts: now_ts(),
        }
    }

    pub fn exec_heartbeat(iter: u32, tool: &str, elapsed_sec: u64) -> Self {
        AgentEvent::Exec {
            iter,
            phase: ExecPhase::Heartbeat,
            tool: Some(tool.to_string()),
            args_preview: None,
            elapsed_sec: Some(elapsed_sec),
            message: None,
            success: None,
            files: None,
            ts: now_ts(),
        }
    }

    pub fn exec_done(iter: u32, tool: &str, elapsed_sec: u64) -> Self {
        AgentEvent::Exec {
            iter,
            phase: ExecPhase::Done,
            tool: Some(tool.to_string()),
            args_preview: None,
            elapsed_sec: Some(elapsed_sec),
            message: Some("completed".to_string()),
            success: Some(true),
            files: None,
            ts: now_ts(),
        }
    }

    pub fn exec_error(iter: u32, tool: &str, message: String, elapsed_sec: u64) -> Self {
        AgentEvent::Exec {
            iter,
            phase: ExecPhase::Error,
            tool: Some(tool.to_string()),
            args_preview: None,
            elapsed_sec: Some(elapsed_sec),
            message: Some(message),
            success: Some(false),
            files: None,
            ts: now_ts(),
        }
    }

    pub fn exec_files(iter: u32, tool: &str, files: Vec<String>) -> Self {
        let count = files.len();
        AgentEvent::Exec {
            iter,
            phase: ExecPhase::Files,
            tool: Some(tool.to_string()),
            args_preview: None,
            elapsed_sec: None,
            message: Some(format!("{count} image(s) queued for the model to view")),
            success: None,
            files: Some(files),
            ts: now_ts(),
        }
    }

    pub fn files_generated(iter: u32, files: Vec<String>) -> Self {
        AgentEvent::FilesGenerated {
            iter,
            files,
            ts: now_ts(),
        }
    }

    pub fn final_success(result: String) -> Self {
        AgentEvent::Final {
            result: FinalResult {
                status: FinalStatus::Success,
                result: Some(result),
                error: None,
            },
        }
    }

    pub fn final_failed(error: String) -> Self {
        AgentEvent::Final {
            result: FinalResult {
                status: FinalStatus::Failed,
                result: None,
                error: Some(error),
            },
        }
    }

    pub fn final_content_filter(error: String) -> Self {
        AgentEvent::Final {
            result: FinalResult {
                status: FinalStatus::ContentFilter,
                result: None,
                error: Some(error),
            },
        }
    }
}
