//! `file_editor` — surgical edits to a workspace file.
//!
//! Two mutually exclusive modes: exact string replacement
//! (`old_string`/`new_string`/`replace_all`) and line-range replacement
//! (`start_line`/`end_line`/`line_content`). The optional `verify_context`
//! marker aborts a line-range edit when the addressed region doesn't contain
//! it, which protects against stale line numbers.

use std::sync::Arc;

use async_trait::async_trait;

use atelier_sandbox::sanitize::validate_filename;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

pub struct FileEditorTool {
    ctx: Arc<ToolContext>,
}

impl FileEditorTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

enum EditMode {
    StringReplace,
    LineRange,
}

#[async_trait]
impl Tool for FileEditorTool {
    fn name(&self) -> &str {
        "file_editor"
    }

    fn description(&self) -> &str {
        "Edit a file in the conversation workspace. Mode 1 (exact string \
         replace): pass old_string + new_string, optionally replace_all. \
         Mode 2 (line range): pass start_line + end_line + line_content, \
         optionally verify_context to guard against stale line numbers. The \
         two modes are mutually exclusive. Prefer mode 1 — it is robust \
         against the file having shifted."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Bare filename inside the workspace (no paths)."
                },
                "old_string": {
                    "type": "string",
                    "description": "Mode 1: exact text to find. Copy it verbatim from file_reader output."
                },
                "new_string": {
                    "type": "string",
                    "description": "Mode 1: replacement text. Empty string deletes old_string."
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Mode 1: replace every occurrence. Default false (old_string must then be unique).",
                    "default": false
                },
                "start_line": {
                    "type": "integer",
                    "description": "Mode 2: first line to replace (1-based).",
                    "minimum": 1
                },
                "end_line": {
                    "type": "integer",
                    "description": "Mode 2: last line to replace (inclusive).",
                    "minimum": 1
                },
                "line_content": {
                    "type": "string",
                    "description": "Mode 2: replacement content (keep indentation and trailing newline)."
                },
                "verify_context": {
                    "type": "string",
                    "description": "Mode 2 (optional): the edit aborts unless the addressed lines contain this text."
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

        let has_string_mode = args.get("old_string").map(|v| !v.is_null()).unwrap_or(false);
        let has_line_mode = ["start_line", "end_line"]
            .iter()
            .any(|k| args.get(*k).map(|v| !v.is_null()).unwrap_or(false));

        let mode = match (has_string_mode, has_line_mode) {
            (true, true) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ParameterValidation,
                    "string-replace and line-range modes are mutually exclusive",
                )
            }
            (true, false) => EditMode::StringReplace,
            (false, true) => EditMode::LineRange,
            (false, false) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ParameterValidation,
                    "pick a mode: old_string + new_string, or start_line + end_line + line_content",
                )
            }
        };

        let result = match mode {
            EditMode::StringReplace => edit_string_replace(&args, &content),
            EditMode::LineRange => edit_line_range(&args, &content),
        };

        let (new_content, detail) = match result {
            Ok(pair) => pair,
            Err(msg) => {
                return ToolEnvelope::failure(self.name(), ErrorKind::ToolExecution, msg)
            }
        };

        // Temp-file-and-rename so a crash mid-write never corrupts the file.
        let tmp_path = workspace.join(format!("{filename}.atelier_edit_tmp"));
        if let Err(e) = std::fs::write(&tmp_path, &new_content) {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ToolExecution,
                format!("failed to write temp file: {e}"),
            );
        }
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ToolExecution,
                format!("failed to replace '{filename}': {e}"),
            );
        }

        ToolEnvelope::success(self.name(), detail)
            .with_generated_files(vec![filename.to_string()])
    }
}

fn edit_string_replace(
    args: &serde_json::Value,
    content: &str,
) -> Result<(String, serde_json::Value), String> {
    let old = args
        .get("old_string")
        .and_then(|v| v.as_str())
        .ok_or("old_string must be a string")?;
    let new = args
        .get("new_string")
        .and_then(|v| v.as_str())
        .ok_or("string-replace mode needs new_string")?;
    let replace_all = args
        .get("replace_all")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let count = content.matches(old).count();
    if count == 0 {
        return Err(
            "old_string not found. Re-read the file and copy the text verbatim.".to_string(),
        );
    }
    if !replace_all && count > 1 {
        return Err(format!(
            "old_string matches {count} times. Add surrounding context to make it unique, or set replace_all=true."
        ));
    }

    let new_content = if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    };

    Ok((
        new_content,
        serde_json::json!({
            "mode": "string_replace",
            "replacements": if replace_all { count } else { 1 },
        }),
    ))
}

fn edit_line_range(
    args: &serde_json::Value,
    content: &str,
) -> Result<(String, serde_json::Value), String> {
    let start_line = args
        .get("start_line")
        .and_then(|v| v.as_u64())
        .ok_or("line-range mode needs start_line")? as usize;
    let end_line = args
        .get("end_line")
        .and_then(|v| v.as_u64())
        .ok_or("line-range mode needs end_line")? as usize;
    let mut line_content = args
        .get("line_content")
        .and_then(|v| v.as_str())
        .ok_or("line-range mode needs line_content")?
        .to_string();
    let verify_context = args.get("verify_context").and_then(|v| v.as_str());

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let total = lines.len();

    if start_line < 1 || end_line < 1 {
        return Err(format!(
            "line numbers are 1-based: start_line={start_line}, end_line={end_line}"
        ));
    }
    if start_line > total || end_line > total {
        return Err(format!(
            "line range out of bounds: start_line={start_line}, end_line={end_line}, file has {total} lines"
        ));
    }
    if start_line > end_line {
        return Err(format!(
            "start_line ({start_line}) must not exceed end_line ({end_line})"
        ));
    }

    let region: String = lines[start_line - 1..end_line].concat();
    if let Some(marker) = verify_context {
        if !region.contains(marker) {
            return Err(format!(
                "context verification failed: lines {start_line}-{end_line} do not contain the \
                 expected marker. Re-read the file to refresh line numbers, or switch to \
                 string-replace mode.\nExpected marker (first 100 chars): {}\nActual region \
                 (first 500 chars): {}",
                truncate(marker, 100),
                truncate(&region, 500),
            ));
        }
    }

    // Preserve the trailing newline convention of the file.
    if !line_content.is_empty() && !line_content.ends_with('\n') && content.ends_with('\n') {
        line_content.push('\n');
    }

    let mut new_content = String::new();
    new_content.push_str(&lines[..start_line - 1].concat());
    new_content.push_str(&line_content);
    new_content.push_str(&lines[end_line..].concat());

    Ok((
        new_content,
        serde_json::json!({
            "mode": "line_range",
            "start_line": start_line,
            "end_line": end_line,
            "lines_replaced": end_line - start_line + 1,
        }),
    ))
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...")
    } else {
        text.to_string()
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

    fn seeded(tmp: &std::path::Path, content: &str) -> (Arc<ToolContext>, serde_json::Value) {
        let ctx = test_ctx(tmp);
        let ws = ctx.workspaces.workspace_dir("d1").unwrap();
        std::fs::write(ws.join("config.py"), content).unwrap();
        let base = serde_json::json!({
            "filename": "config.py",
            "conversation_id": "abcd1234",
            "_output_dir_name": "d1",
        });
        (ctx, base)
    }

    #[tokio::test]
    async fn string_replace_edits_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, mut args) = seeded(tmp.path(), "timeout = 30\nretries = 5\n");
        args["old_string"] = serde_json::json!("timeout = 30");
        args["new_string"] = serde_json::json!("timeout = 60");

        let tool = FileEditorTool::new(ctx.clone());
        let env = tool.execute(args).await;
        assert!(env.success, "{:?}", env.error_message);
        assert_eq!(env.generated_files, vec!["config.py".to_string()]);

        let ws = ctx.workspaces.workspace_dir("d1").unwrap();
        let content = std::fs::read_to_string(ws.join("config.py")).unwrap();
        assert_eq!(content, "timeout = 60\nretries = 5\n");
    }

    #[tokio::test]
    async fn ambiguous_match_requires_replace_all() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, mut args) = seeded(tmp.path(), "x = 1\nx = 1\n");
        args["old_string"] = serde_json::json!("x = 1");
        args["new_string"] = serde_json::json!("x = 2");

        let env = FileEditorTool::new(ctx.clone()).execute(args.clone()).await;
        assert!(!env.success);
        assert!(env.error_message.unwrap().contains("matches 2 times"));

        args["replace_all"] = serde_json::json!(true);
        let env = FileEditorTool::new(ctx).execute(args).await;
        assert!(env.success);
    }

    #[tokio::test]
    async fn line_range_replaces_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, mut args) = seeded(tmp.path(), "a\nb\nc\nd\n");
        args["start_line"] = serde_json::json!(2);
        args["end_line"] = serde_json::json!(3);
        args["line_content"] = serde_json::json!("B\nC");

        let env = FileEditorTool::new(ctx.clone()).execute(args).await;
        assert!(env.success, "{:?}", env.error_message);

        let ws = ctx.workspaces.workspace_dir("d1").unwrap();
        let content = std::fs::read_to_string(ws.join("config.py")).unwrap();
        assert_eq!(content, "a\nB\nC\nd\n");
    }

    #[tokio::test]
    async fn verify_context_mismatch_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, mut args) = seeded(tmp.path(), "alpha\nbeta\ngamma\n");
        args["start_line"] = serde_json::json!(1);
        args["end_line"] = serde_json::json!(1);
        args["line_content"] = serde_json::json!("ALPHA");
        args["verify_context"] = serde_json::json!("beta");

        let env = FileEditorTool::new(ctx.clone()).execute(args).await;
        assert!(!env.success);
        assert!(env
            .error_message
            .unwrap()
            .contains("context verification failed"));

        // File untouched.
        let ws = ctx.workspaces.workspace_dir("d1").unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.join("config.py")).unwrap(),
            "alpha\nbeta\ngamma\n"
        );
    }

    #[tokio::test]
    async fn both_modes_at_once_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, mut args) = seeded(tmp.path(), "x\n");
        args["old_string"] = serde_json::json!("x");
        args["new_string"] = serde_json::json!("y");
        args["start_line"] = serde_json::json!(1);
        args["end_line"] = serde_json::json!(1);
        args["line_content"] = serde_json::json!("z");

        let env = FileEditorTool::new(ctx).execute(args).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::ParameterValidation));
    }
}
