//! `create_plan` — persist a structured task plan to the workspace.
//!
//! The plan lands in `plan.json`; the orchestrator additionally emits a
//! `plan_update` event so clients can render it with dedicated UI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    pub steps: Vec<PlanStep>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

pub struct CreatePlanTool {
    ctx: Arc<ToolContext>,
}

impl CreatePlanTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for CreatePlanTool {
    fn name(&self) -> &str {
        "create_plan"
    }

    fn description(&self) -> &str {
        "Create or update the task plan for this conversation. Pass the \
         overall task description and an ordered list of steps, each with a \
         status (pending, in_progress, completed, failed). The plan is saved \
         to plan.json in the workspace and shown to the user. Call it again \
         with updated statuses as work progresses."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "One-sentence description of the overall task."
                },
                "steps": {
                    "type": "array",
                    "description": "Ordered plan steps.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "failed"]
                            }
                        },
                        "required": ["description"]
                    }
                }
            },
            "required": ["task", "steps"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["task", "steps"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let workspace = match self.ctx.workspace_from_args(&args) {
            Ok(dir) => dir,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };

        let task = args.get("task").and_then(|v| v.as_str()).unwrap_or_default();
        let steps: Vec<PlanStep> = match args
            .get("steps")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(steps)) => steps,
            Ok(None) | Err(_) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::DataFormat,
                    "steps must be a list of {description, status} objects",
                )
            }
        };

        let plan = Plan {
            task: task.to_string(),
            steps,
            updated_at: atelier_core::types::now_stored(),
        };

        let plan_value = match serde_json::to_value(&plan) {
            Ok(v) => v,
            Err(e) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::ToolExecution, e.to_string())
            }
        };

        let raw = serde_json::to_string_pretty(&plan_value).unwrap_or_default();
        if let Err(e) = std::fs::write(workspace.join("plan.json"), raw) {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ToolExecution,
                format!("failed to write plan.json: {e}"),
            );
        }

        let done = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        let summary = format!("{done}/{} steps completed", plan.steps.len());

        ToolEnvelope::success(
            self.name(),
            serde_json::json!({ "plan": plan_value, "summary": summary }),
        )
        .with_generated_files(vec!["plan.json".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_sandbox::SandboxRunner;
    use atelier_store::ConversationStore;
    use atelier_workspace::WorkspaceRoot;

    fn test_ctx(tmp: &std::path::Path) -> Arc<ToolContext> {
        let store =
            ConversationStore::open(tmp.join("data/conversations"), tmp.join("outputs")).unwrap();
        Arc::new(ToolContext {
            store: Arc::new(store),
            workspaces: WorkspaceRoot::new(tmp.join("outputs")),
            runner: SandboxRunner::new(None),
            code_timeout_secs: 30,
            shell_timeout_secs: 30,
            http: reqwest::Client::new(),
            search_api_key: None,
        })
    }

    #[tokio::test]
    async fn plan_lands_in_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        let tool = CreatePlanTool::new(ctx.clone());

        let env = tool
            .execute(serde_json::json!({
                "task": "build a report",
                "steps": [
                    { "description": "gather data", "status": "completed" },
                    { "description": "draw charts", "status": "in_progress" },
                    { "description": "write summary" },
                ],
                "conversation_id": "abcd1234",
                "_output_dir_name": "d1",
            }))
            .await;

        assert!(env.success, "{:?}", env.error_message);
        assert_eq!(env.generated_files, vec!["plan.json".to_string()]);
        let data = env.data.unwrap();
        assert_eq!(data["summary"], "1/3 steps completed");

        let ws = ctx.workspaces.workspace_dir("d1").unwrap();
        let saved: Plan =
            serde_json::from_str(&std::fs::read_to_string(ws.join("plan.json")).unwrap()).unwrap();
        assert_eq!(saved.steps.len(), 3);
        assert_eq!(saved.steps[2].status, StepStatus::Pending);
    }
}
