//! Wire types for the chat API.

use serde::{Deserialize, Serialize};

/// Incoming chat request. When `conversation_id` is absent the server mints
/// a fresh one and returns it, so clients can continue the conversation.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Complete reply for a batch chat request.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub conversation_id: String,
    pub role: String,
}

/// One server-sent frame of a streamed reply. The terminating frame carries
/// the literal payload `[DONE]` instead of JSON.
#[derive(Debug, Serialize)]
pub struct StreamFrame {
    pub id: String,
    pub content: String,
    pub conversation_id: String,
    pub role: String,
}
