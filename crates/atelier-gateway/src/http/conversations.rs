//! Conversation CRUD + model rebinding + workspace bookmarks.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use atelier_store::StoreError;

use crate::app::AppState;
use crate::auth::resolve_username;

type HandlerError = (StatusCode, Json<serde_json::Value>);

fn unauthorized() -> HandlerError {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
}

fn store_error(e: StoreError) -> HandlerError {
    let status = match &e {
        StoreError::NotFound { .. } | StoreError::MissingFile { .. } => StatusCode::NOT_FOUND,
        StoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

#[derive(Deserialize)]
pub struct CreateBody {
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    let model = body
        .model
        .unwrap_or_else(|| state.config.agent.model.clone());
    let meta = state
        .store
        .create(&model, username.as_deref())
        .map_err(store_error)?;
    Ok(Json(serde_json::to_value(meta).unwrap_or_default()))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    let metas = state.store.list(username.as_deref(), query.model.as_deref());
    Ok(Json(json!({ "conversations": metas })))
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(conv_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    let conv = state
        .store
        .get(&conv_id, username.as_deref())
        .map_err(store_error)?;
    Ok(Json(serde_json::to_value(conv).unwrap_or_default()))
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(conv_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    state
        .store
        .delete(&conv_id, username.as_deref())
        .map_err(store_error)?;
    Ok(Json(json!({ "deleted": conv_id })))
}

#[derive(Deserialize)]
pub struct SetModelBody {
    pub model: String,
}

pub async fn set_model_handler(
    State(state): State<Arc<AppState>>,
    Path(conv_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SetModelBody>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    state
        .store
        .set_model(&conv_id, &body.model, username.as_deref())
        .map_err(store_error)?;
    Ok(Json(json!({ "id": conv_id, "model": body.model })))
}

// ── Bookmarks ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BookmarkBody {
    pub conv_id: String,
    pub filename: String,
}

/// Bookmarks are per-user; anonymous callers share the "anonymous" shelf.
fn bookmark_user(username: Option<String>) -> String {
    username.unwrap_or_else(|| "anonymous".to_string())
}

pub async fn bookmarks_list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    let marks = state.bookmarks.list(&bookmark_user(username));
    Ok(Json(json!({ "bookmarks": marks })))
}

pub async fn bookmarks_add_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BookmarkBody>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;

    // Only real workspace files can be pinned.
    let output_dir = state.store.output_dir_name(&body.conv_id).map_err(store_error)?;
    if !state.workspaces.file_exists(&output_dir, &body.filename) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no such file in workspace: {}", body.filename) })),
        ));
    }

    let added = state
        .bookmarks
        .add(
            &bookmark_user(username),
            &body.conv_id,
            &body.filename,
            &atelier_core::types::now_stored(),
        )
        .map_err(|e| {
            warn!(error = %e, "bookmark add failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;
    Ok(Json(json!({ "added": added })))
}

pub async fn bookmarks_remove_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BookmarkBody>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let username = resolve_username(&state, &headers).map_err(|_| unauthorized())?;
    let removed = state
        .bookmarks
        .remove(&bookmark_user(username), &body.conv_id, &body.filename)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;
    Ok(Json(json!({ "removed": removed })))
}
