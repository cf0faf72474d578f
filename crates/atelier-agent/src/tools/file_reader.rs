//! `file_reader` — read a workspace file, optionally a line range.

use std::sync::Arc;

use async_trait::async_trait;

use atelier_sandbox::sanitize::validate_filename;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

/// Cap on returned characters so a big file can't flood the context window.
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct FileReaderTool {
    ctx: Arc<ToolContext>,
}

impl FileReaderTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for FileReaderTool {
    fn name(&self) -> &str {
        "file_reader"
    }

    fn description(&self) -> &str {
        "Read a file from the conversation workspace. Optionally limit the \
         read to a line range with `offset` (1-based first line) and `limit` \
         (number of lines). Output is truncated after 30000 characters."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Bare filename inside the workspace (no paths)."
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start from (optional).",
                    "minimum": 1
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (optional).",
                    "minimum": 1
                }
            },
            "required": ["filename"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["filename"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let filename = args
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if let Err(e) = validate_filename(filename) {
            return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e);
        }

        let workspace = match self.ctx.workspace_from_args(&args) {
            Ok(dir) => dir,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };

        let path = workspace.join(filename);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::DataNotFound,
                    format!("failed to read '{filename}': {e}"),
                )
            }
        };

        let offset = args.get("offset").and_then(|v| v.as_u64()).map(|v| v as usize);
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        let total_lines = content.lines().count();
        let text = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(1).saturating_sub(1);
            let lines: Vec<&str> = content.lines().skip(start).collect();
            let lines = match limit {
                Some(n) => &lines[..n.min(lines.len())],
                None => &lines[..],
            };
            lines.join("\n")
        } else {
            content
        };

        let truncated = text.chars().count() > MAX_OUTPUT_CHARS;
        let text = if truncated {
            let head: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
            format!("{head}\n\n[output truncated at {MAX_OUTPUT_CHARS} characters]")
        } else {
            text
        };

        ToolEnvelope::success(
            self.name(),
            serde_json::json!({
                "filename": filename,
                "content": text,
                "total_lines": total_lines,
                "truncated": truncated,
            }),
        )
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

    fn args_for(dir: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut args = extra;
        args["conversation_id"] = serde_json::json!("abcd1234");
        args["_output_dir_name"] = serde_json::json!(dir);
        args
    }

    #[tokio::test]
    async fn reads_line_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = test_ctx(tmp.path());
        let ws = ctx.workspaces.workspace_dir("d1").unwrap();
        std::fs::write(ws.join("notes.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let tool = FileReaderTool::new(ctx);
        let env = tool
            .execute(args_for(
                "d1",
                serde_json::json!({ "filename": "notes.txt", "offset": 2, "limit": 2 }),
            ))
            .await;
        assert!(env.success);
        assert_eq!(env.data.unwrap()["content"], "two\nthree");
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FileReaderTool::new(test_ctx(tmp.path()));
        let env = tool
            .execute(args_for(
                "d1",
                serde_json::json!({ "filename": "../secret.txt" }),
            ))
            .await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::ParameterValidation));
    }

    #[tokio::test]
    async fn missing_file_is_data_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FileReaderTool::new(test_ctx(tmp.path()));
        let env = tool
            .execute(args_for("d1", serde_json::json!({ "filename": "nope.txt" })))
            .await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::DataNotFound));
    }
}
