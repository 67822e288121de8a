use std::sync::Arc;

use parley_ai::ChatService;

/// Application state shared across all API handlers.
pub type AppState = Arc<ChatService>;
