//! Deterministic mock LLM client for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{ChatError, Result};

use super::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage,
};

/// Deterministic step for scripted mock completions.
#[derive(Debug, Clone)]
pub enum MockStepKind {
    /// Return a plain assistant message.
    Text(String),
    /// Stream the given fragments in order; `complete` joins them.
    Fragments(Vec<String>),
    /// Return an LLM error.
    Error(String),
}

/// Scripted completion step.
#[derive(Debug, Clone)]
pub struct MockStep {
    pub kind: MockStepKind,
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MockStepKind::Text(content.into()),
        }
    }

    pub fn fragments(fragments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: MockStepKind::Fragments(fragments.into_iter().map(Into::into).collect()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: MockStepKind::Error(message.into()),
        }
    }
}

/// A deterministic mock LLM client driven by scripted steps. With an empty
/// script it echoes the last user message, which keeps multi-turn tests
/// self-describing.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
        }
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    async fn next_step(&self) -> Option<MockStep> {
        self.script.lock().await.pop_front()
    }

    fn usage_for(content_len: usize) -> TokenUsage {
        let completion_tokens = content_len as u32;
        TokenUsage {
            prompt_tokens: 1,
            completion_tokens,
            total_tokens: 1 + completion_tokens,
        }
    }

    fn fallback_text(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|msg| matches!(msg.role, Role::User))
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string())
    }

    fn response_from(text: String) -> CompletionResponse {
        CompletionResponse {
            usage: Some(Self::usage_for(text.len())),
            content: text,
            finish_reason: FinishReason::Stop,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let Some(step) = self.next_step().await else {
            return Ok(Self::response_from(Self::fallback_text(&request)));
        };

        match step.kind {
            MockStepKind::Text(content) => Ok(Self::response_from(content)),
            MockStepKind::Fragments(fragments) => Ok(Self::response_from(fragments.concat())),
            MockStepKind::Error(message) => Err(ChatError::Llm(message)),
        }
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.clone();
        Box::pin(try_stream! {
            let step = client.next_step().await;
            match step.map(|s| s.kind) {
                Some(MockStepKind::Fragments(fragments)) => {
                    let total: usize = fragments.iter().map(|f| f.len()).sum();
                    for fragment in fragments {
                        yield StreamChunk::text(fragment);
                    }
                    yield StreamChunk::final_chunk(
                        FinishReason::Stop,
                        Some(Self::usage_for(total)),
                    );
                }
                Some(MockStepKind::Text(content)) => {
                    let usage = Self::usage_for(content.len());
                    if !content.is_empty() {
                        yield StreamChunk::text(content);
                    }
                    yield StreamChunk::final_chunk(FinishReason::Stop, Some(usage));
                }
                Some(MockStepKind::Error(message)) => {
                    Err(ChatError::Llm(message))?;
                }
                None => {
                    let text = Self::fallback_text(&request);
                    let usage = Self::usage_for(text.len());
                    yield StreamChunk::text(text);
                    yield StreamChunk::final_chunk(FinishReason::Stop, Some(usage));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::llm::client::Message;

    #[tokio::test]
    async fn mock_client_returns_scripted_text() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::text("hello")]);

        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .expect("mock response should succeed");

        assert_eq!(response.content, "hello");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn mock_client_echoes_without_script() {
        let client = MockLlmClient::new("mock-model");

        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .unwrap();

        assert_eq!(response.content, "mock-echo: ping");
    }

    #[tokio::test]
    async fn mock_client_streams_fragments_in_order() {
        let client =
            MockLlmClient::from_steps("mock-model", vec![MockStep::fragments(["Hel", "lo"])]);

        let chunks: Vec<StreamChunk> = client
            .complete_stream(CompletionRequest::new(vec![Message::user("hi")]))
            .try_collect()
            .await
            .unwrap();

        let fragments: Vec<&str> = chunks
            .iter()
            .filter(|c| !c.is_final())
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(fragments, ["Hel", "lo"]);
        assert!(chunks.last().unwrap().is_final());
    }

    #[tokio::test]
    async fn mock_client_streams_scripted_error() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::error("boom")]);

        let result: Result<Vec<StreamChunk>> = client
            .complete_stream(CompletionRequest::new(vec![Message::user("hi")]))
            .try_collect()
            .await;

        assert!(matches!(result, Err(ChatError::Llm(msg)) if msg == "boom"));
    }
}
