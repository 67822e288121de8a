//! Chat endpoints: batch completion and SSE streaming.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, stream};
use uuid::Uuid;

use crate::api::models::{ChatRequest, ChatResponse, StreamFrame};
use crate::api::state::AppState;

const ASSISTANT_ROLE: &str = "assistant";
const DONE_SENTINEL: &str = "[DONE]";

fn resolve_conversation_id(requested: Option<String>) -> String {
    requested.unwrap_or_else(|| Uuid::new_v4().to_string())
}

// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let conversation_id = resolve_conversation_id(request.conversation_id);
    tracing::debug!(conversation_id, "Handling chat request");

    let content = state.respond(&conversation_id, &request.message).await;

    Json(ChatResponse {
        content,
        conversation_id,
        role: ASSISTANT_ROLE.to_string(),
    })
}

// POST /api/chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let conversation_id = resolve_conversation_id(request.conversation_id);
    tracing::debug!(conversation_id, "Handling streaming chat request");

    let fragments = state.respond_stream(conversation_id.clone(), request.message);

    let frames = fragments.map(move |content| {
        let frame = StreamFrame {
            id: Uuid::new_v4().to_string(),
            content,
            conversation_id: conversation_id.clone(),
            role: ASSISTANT_ROLE.to_string(),
        };
        // StreamFrame is plain strings; serialization cannot fail.
        Ok(Event::default().data(serde_json::to_string(&frame).unwrap_or_default()))
    });
    let done = stream::once(async { Ok(Event::default().data(DONE_SENTINEL)) });

    Sse::new(frames.chain(done)).keep_alive(KeepAlive::default())
}
