//! Tool system: the contract every tool implements, the result envelope, and
//! the registry the orchestrator invokes through.

pub mod code_executor;
pub mod create_plan;
pub mod file_editor;
pub mod file_list;
pub mod file_reader;
pub mod file_writer;
pub mod manage_images_view;
pub mod shell_executor;
pub mod url_fetch;
pub mod web_search;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use atelier_sandbox::SandboxRunner;
use atelier_store::{ConversationStore, ImageDetail};
use atelier_workspace::WorkspaceRoot;

use crate::provider::ToolSchema;

/// Tools that operate inside a conversation workspace. The orchestrator
/// force-injects `conversation_id` and `_output_dir_name` into their
/// arguments, overwriting anything the model supplied.
pub const SANDBOX_TOOLS: &[&str] = &[
    "code_executor",
    "shell_executor",
    "file_reader",
    "file_list",
    "file_writer",
    "file_editor",
    "create_plan",
    "manage_images_view",
];

/// Error classification propagated in envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParameterValidation,
    ToolExecution,
    ExternalApi,
    Network,
    RateLimit,
    LlmTimeout,
    LlmResponseParse,
    LlmApi,
    DataNotFound,
    DataFormat,
    ResourceExhausted,
    ContentFilter,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    #[default]
    Atomic,
    Workflow,
}

/// The fixed-shape result every tool returns. Tools never raise; failures
/// travel inside the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ToolEnvelope {
    pub success: bool,
    pub tool_name: String,
    pub tool_type: ToolType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Files newly created or mutated in the workspace during this call.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generated_files: Vec<String>,
    /// Filenames to queue for multimodal injection on the next turn.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inject_images: Vec<String>,
    pub image_detail: ImageDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_results: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recovery_suggestions: Vec<String>,
}

impl ToolEnvelope {
    pub fn success(tool_name: &str, data: serde_json::Value) -> Self {
        Self {
            success: true,
            tool_name: tool_name.to_string(),
            tool_type: ToolType::Atomic,
            data: Some(data),
            error_kind: None,
            error_message: None,
            generated_files: Vec::new(),
            inject_images: Vec::new(),
            image_detail: ImageDetail::Auto,
            partial_results: None,
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn failure(tool_name: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            tool_name: tool_name.to_string(),
            tool_type: ToolType::Atomic,
            data: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            generated_files: Vec::new(),
            inject_images: Vec::new(),
            image_detail: ImageDetail::Auto,
            partial_results: None,
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_generated_files(mut self, files: Vec<String>) -> Self {
        self.generated_files = files;
        self
    }

    pub fn with_inject_images(mut self, files: Vec<String>, detail: ImageDetail) -> Self {
        self.inject_images = files;
        self.image_detail = detail;
        self
    }

    pub fn with_recovery_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.recovery_suggestions = suggestions;
        self
    }

    /// The text body fed back to the model as the tool message content.
    pub fn to_message_text(&self) -> String {
        let value = if self.success {
            serde_json::json!({
                "status": "success",
                "data": self.data,
                "generated_files": self.generated_files,
            })
        } else {
            serde_json::json!({
                "status": "failed",
                "error_type": self.error_kind,
                "error": self.error_message,
                "recovery_suggestions": self.recovery_suggestions,
            })
        };
        value.to_string()
    }
}

/// Shared services handed to tools at construction.
pub struct ToolContext {
    pub store: Arc<ConversationStore>,
    pub workspaces: WorkspaceRoot,
    pub runner: SandboxRunner,
    pub code_timeout_secs: u64,
    pub shell_timeout_secs: u64,
    pub http: reqwest::Client,
    pub search_api_key: Option<String>,
}

impl ToolContext {
    /// Resolve the workspace directory from the injected `_output_dir_name`
    /// argument. Errors map to a failure envelope at the call site.
    pub fn workspace_from_args(
        &self,
        args: &serde_json::Value,
    ) -> Result<std::path::PathBuf, String> {
        let output_dir = args
            .get("_output_dir_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing _output_dir_name (injected by the orchestrator)".to_string())?;
        self.workspaces
            .workspace_dir(output_dir)
            .map_err(|e| e.to_string())
    }

    pub fn conversation_id_from_args(&self, args: &serde_json::Value) -> Result<String, String> {
        args.get("conversation_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| "missing conversation_id (injected by the orchestrator)".to_string())
    }
}

/// Contract every tool implements. `parameters` is the JSON schema the LLM
/// sees; `required_params` drives registry-side validation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;
    fn required_params(&self) -> &[&str] {
        &[]
    }
    async fn execute(&self, args: serde_json::Value) -> ToolEnvelope;
}

/// Immutable-after-startup registry mapping tool names to implementations.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool re-registered, previous entry replaced");
        } else {
            info!(tool = %name, "tool registered");
        }
    }

    /// All built-in tools wired to one shared context.
    pub fn with_builtin_tools(ctx: Arc<ToolContext>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(code_executor::CodeExecutorTool::new(ctx.clone())));
        registry.register(Arc::new(shell_executor::ShellExecutorTool::new(ctx.clone())));
        registry.register(Arc::new(file_reader::FileReaderTool::new(ctx.clone())));
        registry.register(Arc::new(file_list::FileListTool::new(ctx.clone())));
        registry.register(Arc::new(file_writer::FileWriterTool::new(ctx.clone())));
        registry.register(Arc::new(file_editor::FileEditorTool::new(ctx.clone())));
        registry.register(Arc::new(create_plan::CreatePlanTool::new(ctx.clone())));
        registry.register(Arc::new(manage_images_view::ManageImagesViewTool::new(
            ctx.clone(),
        )));
        registry.register(Arc::new(web_search::WebSearchTool::new(ctx.clone())));
        registry.register(Arc::new(url_fetch::UrlFetchTool::new(ctx)));
        registry
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas for the adapters to translate to each provider's tool format.
    pub fn function_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Invoke a tool. Never raises: unknown tools and validation failures
    /// come back as failure envelopes.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> ToolEnvelope {
        let Some(tool) = self.tools.get(name) else {
            return ToolEnvelope::failure(
                name,
                ErrorKind::ToolExecution,
                format!(
                    "unknown tool: {name}. Available tools: {}",
                    self.names().join(", ")
                ),
            );
        };

        let missing: Vec<&str> = tool
            .required_params()
            .iter()
            .filter(|p| args.get(**p).map(|v| v.is_null()).unwrap_or(true))
            .copied()
            .collect();
        if !missing.is_empty() {
            return ToolEnvelope::failure(
                name,
                ErrorKind::ParameterValidation,
                format!("missing required parameter(s): {}", missing.join(", ")),
            );
        }

        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo back"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        fn required_params(&self) -> &[&str] {
            &["text"]
        }
        async fn execute(&self, args: serde_json::Value) -> ToolEnvelope {
            ToolEnvelope::success("echo", serde_json::json!({ "echo": args["text"] }))
        }
    }

    #[tokio::test]
    async fn invoke_runs_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let env = registry
            .invoke("echo", serde_json::json!({ "text": "hi" }))
            .await;
        assert!(env.success);
        assert_eq!(env.data.unwrap()["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_envelope() {
        let registry = ToolRegistry::new();
        let env = registry.invoke("ghost", serde_json::json!({})).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::ToolExecution));
    }

    #[tokio::test]
    async fn missing_required_param_is_validation_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let env = registry.invoke("echo", serde_json::json!({})).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(ErrorKind::ParameterValidation));
    }

    #[test]
    fn envelope_message_text_shapes() {
        let ok = ToolEnvelope::success("t", serde_json::json!({"x": 1}))
            .with_generated_files(vec!["a.png".into()]);
        let text = ok.to_message_text();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], "success");
        assert_eq!(parsed["generated_files"][0], "a.png");

        let bad = ToolEnvelope::failure("t", ErrorKind::ParameterValidation, "missing x");
        let parsed: serde_json::Value = serde_json::from_str(&bad.to_message_text()).unwrap();
        assert_eq!(parsed["status"], "failed");
        assert_eq!(parsed["error_type"], "parameter_validation");
    }
}
