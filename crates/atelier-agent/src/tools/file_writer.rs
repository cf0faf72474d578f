//! `file_writer` — create or overwrite a workspace file.

use std::sync::Arc;

use async_trait::async_trait;

use atelier_sandbox::sanitize::validate_filename;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

pub struct FileWriterTool {
    ctx: Arc<ToolContext>,
}

impl FileWriterTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for FileWriterTool {
    fn name(&self) -> &str {
        "file_writer"
    }

    fn description(&self) -> &str {
        "Write text content to a file in the conversation workspace. \
         Overwrites by default; pass append=true to append. Use this to save \
         scripts for code_executor's file mode, notes, or any text artifact."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Bare filename inside the workspace (no paths)."
                },
                "content": {
                    "type": "string",
                    "description": "Text content to write."
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of overwrite. Default false.",
                    "default": false
                }
            },
            "required": ["filename", "content"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["filename", "content"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let filename = args
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if let Err(e) = validate_filename(filename) {
            return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e);
        }
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let append = args
            .get("append")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let workspace = match self.ctx.workspace_from_args(&args) {
            Ok(dir) => dir,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };
        let path = workspace.join(filename);

        let result = if append {
            use std::io::Write;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| f.write_all(content.as_bytes()))
        } else {
            std::fs::write(&path, content)
        };

        if let Err(e) = result {
            return ToolEnvelope::failure(
                self.name(),
                ErrorKind::ToolExecution,
                format!("failed to write '{filename}': {e}"),
            );
        }

        ToolEnvelope::success(
            self.name(),
            serde_json::json!({
                "filename": filename,
                "bytes_written": content.len(),
                "mode": if append { "append" } else { "overwrite" },
            }),
        )
        .with_generated_files(vec![filename.to_string()])
    }
}
