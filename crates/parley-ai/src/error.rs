//! Error types for the chat core

use thiserror::Error;

/// Chat core error types
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{provider} returned HTTP {status}: {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Configuration errors are fatal at startup and must never be defaulted
    /// away. Everything else is a generation failure the orchestrator
    /// recovers from.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownProvider(_) | Self::MissingApiKey(_) | Self::Config(_)
        )
    }
}

/// Result type alias for chat core operations
pub type Result<T> = std::result::Result<T, ChatError>;
