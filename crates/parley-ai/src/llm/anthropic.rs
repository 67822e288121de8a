//! Anthropic LLM provider

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::http_client::{build_http_client, response_to_error};
use crate::llm::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, StreamChunk,
    StreamResult, TokenUsage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic client
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    /// Create a new Anthropic client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "claude-3-5-haiku-20241022".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for tests and proxies)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

impl AnthropicRequest {
    /// The messages API takes the system instruction as a top-level field,
    /// not as a conversation turn.
    fn from_request(model: &str, request: &CompletionRequest, stream: bool) -> Self {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect();

        Self {
            model: model.to_string(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: request.temperature,
            stream: stream.then_some(true),
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicResponseContent {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("max_tokens") => FinishReason::MaxTokens,
        _ => FinishReason::Stop,
    }
}

// Streaming response types

/// Anthropic SSE event types
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: MessageStartPayload,
    },
    ContentBlockStart {
        content_block: ContentBlockStartPayload,
    },
    ContentBlockDelta {
        delta: ContentBlockDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaPayload,
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorPayload,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStartPayload {
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockStartPayload {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockDelta {
    TextDelta { text: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = AnthropicRequest::from_request(&self.model, &request, false);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "Anthropic").await);
        }

        let data: AnthropicResponse = response.json().await?;

        let content = data
            .content
            .into_iter()
            .filter(|block| block.r#type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            finish_reason: map_stop_reason(data.stop_reason.as_deref()),
            usage: Some(TokenUsage {
                prompt_tokens: data.usage.input_tokens,
                completion_tokens: data.usage.output_tokens,
                total_tokens: data.usage.input_tokens + data.usage.output_tokens,
            }),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();
        let base_url = self.base_url.clone();

        Box::pin(async_stream::stream! {
            let body = AnthropicRequest::from_request(&model, &request, true);

            let response = match client
                .post(format!("{}/v1/messages", base_url))
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(ChatError::Llm(format!("Request failed: {}", e)));
                    return;
                }
            };

            if !response.status().is_success() {
                yield Err(response_to_error(response, "Anthropic").await);
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ChatError::Llm(format!("Stream error: {}", e)));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE events from buffer
                while let Some(pos) = buffer.find("\n\n") {
                    let event_str = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event_str.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim().is_empty() {
                            continue;
                        }

                        let event: AnthropicStreamEvent = match serde_json::from_str(data) {
                            Ok(e) => e,
                            Err(_) => continue,
                        };

                        match event {
                            AnthropicStreamEvent::MessageStart { message } => {
                                if let Some(usage) = message.usage {
                                    input_tokens = usage.input_tokens;
                                }
                            }
                            AnthropicStreamEvent::ContentBlockStart { content_block } => {
                                let ContentBlockStartPayload::Text { text } = content_block;
                                if !text.is_empty() {
                                    yield Ok(StreamChunk::text(&text));
                                }
                            }
                            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                                let ContentBlockDelta::TextDelta { text } = delta;
                                if !text.is_empty() {
                                    yield Ok(StreamChunk::text(&text));
                                }
                            }
                            AnthropicStreamEvent::ContentBlockStop {} => {}
                            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                                if let Some(u) = usage {
                                    output_tokens = u.output_tokens;
                                }
                                if let Some(stop_reason) = delta.stop_reason {
                                    yield Ok(StreamChunk::final_chunk(
                                        map_stop_reason(Some(&stop_reason)),
                                        Some(TokenUsage {
                                            prompt_tokens: input_tokens,
                                            completion_tokens: output_tokens,
                                            total_tokens: input_tokens + output_tokens,
                                        }),
                                    ));
                                }
                            }
                            AnthropicStreamEvent::MessageStop => {
                                // Stream complete
                            }
                            AnthropicStreamEvent::Ping => {
                                // Keep-alive, ignore
                            }
                            AnthropicStreamEvent::Error { error } => {
                                yield Err(ChatError::Llm(format!("Stream error: {}", error.message)));
                                return;
                            }
                        }
                    }
                }
            }

            // Process any remaining data in the buffer after the stream ends.
            // This handles the case where the last SSE event lacks a trailing
            // \n\n (e.g., due to a network interruption).
            let remaining = buffer.trim().to_string();
            for line in remaining.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data.trim().is_empty() {
                    continue;
                }

                // Best effort: try to parse the final event
                let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(data) else {
                    continue;
                };

                match event {
                    AnthropicStreamEvent::ContentBlockStart { content_block } => {
                        let ContentBlockStartPayload::Text { text } = content_block;
                        if !text.is_empty() {
                            yield Ok(StreamChunk::text(&text));
                        }
                    }
                    AnthropicStreamEvent::ContentBlockDelta { delta } => {
                        let ContentBlockDelta::TextDelta { text } = delta;
                        if !text.is_empty() {
                            yield Ok(StreamChunk::text(&text));
                        }
                    }
                    AnthropicStreamEvent::MessageDelta { delta, usage } => {
                        if let Some(u) = usage {
                            output_tokens = u.output_tokens;
                        }
                        if let Some(stop_reason) = delta.stop_reason {
                            yield Ok(StreamChunk::final_chunk(
                                map_stop_reason(Some(&stop_reason)),
                                Some(TokenUsage {
                                    prompt_tokens: input_tokens,
                                    completion_tokens: output_tokens,
                                    total_tokens: input_tokens + output_tokens,
                                }),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        })
    }
}
