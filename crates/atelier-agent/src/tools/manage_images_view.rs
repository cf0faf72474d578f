//! `manage_images_view` — the model's explicit control over the
//! pending-image queue. Tools can also enqueue images implicitly via
//! `inject_images` in their envelopes; this tool is the manual path.

use std::sync::Arc;

use async_trait::async_trait;

use atelier_store::ImageDetail;

use super::{ErrorKind, Tool, ToolContext, ToolEnvelope};

pub struct ManageImagesViewTool {
    ctx: Arc<ToolContext>,
}

impl ManageImagesViewTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for ManageImagesViewTool {
    fn name(&self) -> &str {
        "manage_images_view"
    }

    fn description(&self) -> &str {
        "Manage the list of workspace images queued for you to view on the \
         next turn. Actions: add (queue images, optionally with detail \
         low/high/auto), remove (unqueue specific paths), list (show the \
         queue), clear (empty the queue). Queued images are attached to your \
         next request and consumed after viewing."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "remove", "list", "clear"],
                    "description": "What to do with the queue."
                },
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace filenames (for add/remove)."
                },
                "detail": {
                    "type": "string",
                    "enum": ["low", "high", "auto"],
                    "description": "Resolution hint for added images. Default auto."
                }
            },
            "required": ["action"]
        })
    }

    fn required_params(&self) -> &[&str] {
        &["action"]
    }

    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
        let conv_id = match self.ctx.conversation_id_from_args(&args) {
            Ok(id) => id,
            Err(e) => return ToolEnvelope::failure(self.name(), ErrorKind::ParameterValidation, e),
        };
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let paths: Vec<String> = args
            .get("paths")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| p.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let detail = args
            .get("detail")
            .and_then(|v| v.as_str())
            .map(ImageDetail::parse)
            .unwrap_or_default();

        let result = match action {
            "add" => {
                if paths.is_empty() {
                    return ToolEnvelope::failure(
                        self.name(),
                        ErrorKind::ParameterValidation,
                        "action=add needs a non-empty paths list",
                    );
                }
                self.ctx
                    .store
                    .add_pending_images(&conv_id, &paths, detail, 1)
                    .map(|_| {
                        serde_json::json!({
                            "action": "add",
                            "queued": paths,
                            "detail": detail.as_str(),
                        })
                    })
            }
            "remove" => self
                .ctx
                .store
                .remove_pending_images(&conv_id, &paths)
                .map(|removed| serde_json::json!({ "action": "remove", "removed": removed })),
            "list" => self.ctx.store.pending_images(&conv_id).map(|pending| {
                serde_json::json!({
                    "action": "list",
                    "images": pending
                        .iter()
                        .map(|img| serde_json::json!({
                            "path": img.path,
                            "detail": img.detail.as_str(),
                            "remaining_views": img.remaining_views,
                        }))
                        .collect::<Vec<_>>(),
                })
            }),
            "clear" => self
                .ctx
                .store
                .clear_pending_images(&conv_id)
                .map(|removed| serde_json::json!({ "action": "clear", "removed": removed })),
            other => {
                return ToolEnvelope::failure(
                    self.name(),
                    ErrorKind::ParameterValidation,
                    format!("unknown action: {other} (expected add/remove/list/clear)"),
                )
            }
        };

        match result {
            Ok(data) => ToolEnvelope::success(self.name(), data),
            Err(e) => ToolEnvelope::failure(self.name(), ErrorKind::ToolExecution, e.to_string()),
        }
    }
}
