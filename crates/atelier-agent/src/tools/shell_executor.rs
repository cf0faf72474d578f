//! `shell_executor` — one-shot `bash -lc` inside the workspace, behind the
//! deny list. For batch renames, quick greps and pipe processing; anything
//! with real logic belongs in code_executor.

use std::sync::Arc;

use async_trait::async_trait;

use atelier_sandbox::SandboxError;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

pub struct ShellExecutorTool {
    ctx: Arc<ToolContext>,
}

impl ShellExecutorTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ShellExecutorTool {
    fn name(&self) -> &str {
        "shell_executor"
    }

    fn description(&self) -> &str {
        "Execute a bash command inside the conversation workspace. Good for \
         batch file operations (rename, move, copy), quick searches \
         (find/grep) and pipelines (cat | sort | uniq). Dangerous commands \
         (rm, sudo, package installers, redirects out of the workspace) are \
         blocked. For complex logic or anything needing Python libraries use \
         code_executor instead."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "The bash command to execute (runs via bash -lc)."
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (optional).",
                    "minimum": 1
                }
            },
            "required": ["cmd"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["cmd"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let cmd = args.get("cmd").and_then(|v| v.as_str()).unwrap_or_default();

        let workspace = match self.ctx.workspace_from_args(&args) {
            Ok(dir) => dir,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };

        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.ctx.shell_timeout_secs);

        let outcome = match self.ctx.runner.run_shell(cmd, &workspace, timeout).await {
            Ok(o) => o,
            Err(SandboxError::Blocked(reason)) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ToolExecution,
                    format!("command blocked: {reason}"),
                );
            }
            Err(SandboxError::Timeout { secs }) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ResourceExhausted,
                    format!("shell command timed out after {secs}s"),
                );
            }
            Err(e) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::ToolExecution, e.to_string())
            }
        };

        let generated = outcome.generated_files.clone();
        ToolEnvelope::success(
            self.name(),
            serde_json::json!({
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
                "returncode": outcome.returncode,
                "generated_files": generated.clone(),
            }),
        )
        .with_generated_files(generated)
    }
}
