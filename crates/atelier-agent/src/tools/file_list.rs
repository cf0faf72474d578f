//! `file_list` — enumerate the conversation workspace.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

pub struct FileListTool {
    ctx: Arc<ToolContext>,
}

impl FileListTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the files in the conversation workspace with sizes and \
         modification times, newest first."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let workspace = match self.ctx.workspace_from_args(&args) {
            Ok(dir) => dir,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };

        let mut files: Vec<(String, u64, std::time::SystemTime)> = Vec::new();
        match std::fs::read_dir(&workspace) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    let meta = match entry.metadata() {
                        Ok(m) => m,
                        Err(_) => continue,
                    };
                    files.push((
                        name.to_string(),
                        meta.len(),
                        meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                    ));
                }
            }
            Err(e) => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ToolExecution,
                    format!("failed to list workspace: {e}"),
                )
            }
        }

        files.sort_by(|a, b| b.2.cmp(&a.2));
        let listing: Vec<serde_json::Value> = files
            .iter()
            .map(|(name, size, _)| serde_json::json!({ "name": name, "size_bytes": size }))
            .collect();

        ToolEnvelope::success(
            self.name(),
            serde_json::json!({
                "count": listing.len(),
                "files": listing,
            }),
        )
    }
}
