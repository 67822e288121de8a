//! Parley AI - conversational LLM service core
//!
//! This crate provides:
//! - Multi-provider LLM client (Gemini, OpenAI, Anthropic)
//! - Provider registry with fail-fast configuration validation
//! - Conversation orchestration in batch and streaming modes
//! - In-memory conversation store with bounded working memory

pub mod chat;
pub mod config;
pub mod error;
mod http_client;
pub mod llm;
pub mod memory;
pub mod store;

// Re-export commonly used types
pub use chat::{ChatService, FragmentStream};
pub use config::{DEFAULT_MEMORY_LIMIT, DEFAULT_SYSTEM_PROMPT, ProviderSettings, Settings};
pub use error::{ChatError, Result};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, FinishReason, GeminiClient, LlmClient,
    Message, MockLlmClient, MockStep, MockStepKind, OpenAIClient, ProviderFactory,
    ProviderRegistry, Role, StreamChunk, StreamResult, TokenUsage,
};
pub use memory::trim;
pub use store::{ConversationHandle, ConversationStore};
