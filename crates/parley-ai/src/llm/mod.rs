//! LLM module - Multi-provider LLM client abstraction

mod anthropic;
mod client;
mod gemini;
mod mock;
mod openai;
mod registry;

pub use anthropic::AnthropicClient;
pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, StreamChunk,
    StreamResult, TokenUsage,
};
pub use gemini::GeminiClient;
pub use mock::{MockLlmClient, MockStep, MockStepKind};
pub use openai::OpenAIClient;
pub use registry::{ProviderFactory, ProviderRegistry};
