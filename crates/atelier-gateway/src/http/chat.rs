//! Streaming chat endpoint — POST /api/conversations/{id}/chat
//!
//! Runs one full agent turn and streams progress events over SSE. The turn
//! keeps running even if the client drops the stream; results persist to the
//! store either way.
//!
//! Request:  `{"message": "...", "client_msg_id": "..."?}`
//! Response: `text/event-stream`, one JSON object per event, discriminated
//! by its `type` field.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use atelier_agent::orchestrator::TurnRequest;

use crate::app::AppState;
use crate::auth::resolve_username;

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub client_msg_id: Option<String>,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Path(conv_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<serde_json::Value>)>
{
    let username = resolve_username(&state, &headers).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
    })?;

    if body.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message cannot be empty" })),
        ));
    }

    // Existence/ownership check up-front so the client gets a clean 404
    // instead of a failed event stream.
    if let Err(e) = state.store.get(&conv_id, username.as_deref()) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string() })),
        ));
    }

    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let turn = TurnRequest {
        conv_id,
        username,
        user_input: body.message,
        client_msg_id: body.client_msg_id,
    };

    // The turn owns its lifetime: a dropped SSE connection does not abort
    // in-flight tool calls.
    let state_for_turn = state.clone();
    tokio::spawn(async move {
        state_for_turn.orchestrator.run_turn(turn, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|ev| {
        let event = Event::default().json_data(&ev).unwrap_or_else(|e| {
            warn!(error = %e, "event serialization failed");
            Event::default().data("{}")
        });
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
