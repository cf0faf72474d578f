use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use atelier_agent::tools::{ToolContext, ToolRegistry};
use atelier_agent::{Orchestrator, ProviderRouter};
use atelier_core::AtelierConfig;
use atelier_sandbox::SandboxRunner;
use atelier_store::ConversationStore;
use atelier_workspace::{BookmarkStore, WorkspaceRoot};

/// Everything a request handler needs, built once at startup: the process
/// config, the conversation store and workspace roots it persists into, the
/// per-user bookmark shelf, and the orchestrator that runs agent turns.
/// Handlers receive it as `Arc<AppState>`; all interior mutability lives
/// inside the members themselves.
pub struct AppState {
    pub config: AtelierConfig,
    pub store: Arc<ConversationStore>,
    pub workspaces: WorkspaceRoot,
    pub bookmarks: BookmarkStore,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: AtelierConfig) -> anyhow::Result<Self> {
        let store = Arc::new(ConversationStore::open(
            &config.storage.conversations_dir,
            &config.storage.outputs_dir,
        )?);
        let workspaces = WorkspaceRoot::new(&config.storage.outputs_dir);
        let bookmarks_path = std::path::Path::new(&config.storage.conversations_dir)
            .parent()
            .unwrap_or(std::path::Path::new("."))
            .join("bookmarks.json");
        let bookmarks = BookmarkStore::open(bookmarks_path)?;

        let runner = SandboxRunner::new(config.sandbox.python_interpreter.clone());
        let tool_ctx = Arc::new(ToolContext {
            store: store.clone(),
            workspaces: workspaces.clone(),
            runner,
            code_timeout_secs: config.sandbox.code_timeout_secs,
            shell_timeout_secs: config.sandbox.shell_timeout_secs,
            http: reqwest::Client::new(),
            search_api_key: config.providers.search_api_key.clone(),
        });
        let registry = Arc::new(ToolRegistry::with_builtin_tools(tool_ctx));
        let router = Arc::new(ProviderRouter::from_config(&config.providers));

        let orchestrator = Orchestrator::new(
            store.clone(),
            workspaces.clone(),
            registry,
            router,
            config.agent.clone(),
        );

        Ok(Self {
            config,
            store,
            workspaces,
            bookmarks,
            orchestrator,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/api/conversations",
            post(crate::http::conversations::create_handler)
                .get(crate::http::conversations::list_handler),
        )
        .route(
            "/api/conversations/{id}",
            get(crate::http::conversations::get_handler)
                .delete(crate::http::conversations::delete_handler),
        )
        .route(
            "/api/conversations/{id}/model",
            put(crate::http::conversations::set_model_handler),
        )
        .route(
            "/api/conversations/{id}/chat",
            post(crate::http::chat::chat_handler),
        )
        .route(
            "/api/bookmarks",
            get(crate::http::conversations::bookmarks_list_handler)
                .post(crate::http::conversations::bookmarks_add_handler),
        )
        .route(
            "/api/bookmarks/remove",
            delete(crate::http::conversations::bookmarks_remove_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
