//! `code_executor` — run model-generated Python inside the conversation
//! workspace. Inline mode takes the code directly; file mode executes a
//! script previously written with `file_writer`, which keeps long programs
//! editable across iterations.

use std::sync::Arc;

use async_trait::async_trait;

use atelier_sandbox::SandboxError;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

pub struct CodeExecutorTool {
    ctx: Arc<ToolContext>,
}

impl CodeExecutorTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for CodeExecutorTool {
    fn name(&self) -> &str {
        "code_executor"
    }

    fn description(&self) -> &str {
        "Execute Python code in a sandboxed workspace for data processing, \
         scientific computing and visualisation. Two modes: inline (pass \
         `code`) for one-shot snippets, or file (pass `script_file`, a \
         filename previously saved with file_writer) for longer programs \
         that need iteration. Generated files are saved with bare filenames \
         in the conversation workspace — never use directory paths. Not \
         suited to simple batch file operations (use shell_executor)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Inline Python code to execute (mutually exclusive with script_file)."
                },
                "script_file": {
                    "type": "string",
                    "description": "Filename of a script in the workspace to execute (mutually exclusive with code)."
                },
                "output_filename": {
                    "type": "string",
                    "description": "Expected output filename, e.g. chart.png (optional)."
                },
                "timeout": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional).",
                    "minimum": 1
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let code = args.get("code").and_then(|v| v.as_str());
        let script_file = args.get("script_file").and_then(|v| v.as_str());

        match (code, script_file) {
            (None, None) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ParameterValidation,
                    "provide either `code` (inline mode) or `script_file` (file mode)",
                )
            }
            (Some(_), Some(_)) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ParameterValidation,
                    "`code` and `script_file` are mutually exclusive, pick one mode",
                )
            }
            _ => {}
        }

        let workspace = match self.ctx.workspace_from_args(&args) {
            Ok(dir) => dir,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };

        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.ctx.code_timeout_secs);

        let result = match (code, script_file) {
            (Some(code), None) => self.ctx.runner.run_python(code, &workspace, timeout).await,
            (None, Some(file)) => {
                self.ctx
                    .runner
                    .run_python_file(file, &workspace, timeout)
                    .await
            }
            _ => unreachable!(),
        };

        let outcome = match result {
            Ok(o) => o,
            Err(SandboxError::Timeout { secs }) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ResourceExhausted,
                    format!("execution timed out after {secs}s"),
                )
                .with_recovery_suggestions(vec![
                    "reduce the amount of work per run".to_string(),
                    "raise the timeout parameter".to_string(),
                ]);
            }
            Err(SandboxError::ScriptNotFound(f)) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::DataNotFound,
                    format!("script file not found: {f}. Create it with file_writer first."),
                );
            }
            Err(e) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::ToolExecution, e.to_string())
            }
        };

        let mut generated = outcome.generated_files.clone();
        if let Some(expected) = args.get("output_filename").and_then(|v| v.as_str()) {
            if workspace.join(expected).is_file() && !generated.contains(&expected.to_string()) {
                generated.push(expected.to_string());
            }
        }

        if outcome.returncode != 0 {
            let stderr_tail: String = outcome
                .stderr
                .lines()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ToolExecution,
                format!(
                    "code exited with status {} \n{stderr_tail}",
                    outcome.returncode
                ),
            );
        }

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
    async fn neither_mode_is_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = CodeExecutorTool::new(test_ctx(tmp.path()));
        let env = tool.execute(serde_json::json!({})).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::ParameterValidation));
    }

    #[tokio::test]
    async fn both_modes_is_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = CodeExecutorTool::new(test_ctx(tmp.path()));
        let env = tool
            .execute(serde_json::json!({ "code": "x", "script_file": "y.py" }))
            .await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::ParameterValidation));
    }

    #[tokio::test]
    async fn missing_workspace_injection_is_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = CodeExecutorTool::new(test_ctx(tmp.path()));
        let env = tool
            .execute(serde_json::json!({ "code": "print(1)" }))
            .await;
        assert!(!env.success);
        assert!(env.error_message.unwrap().contains("_output_dir_name"));
    }
}
