//! OpenAI LLM provider

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

/// OpenAI client
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::MaxTokens,
        _ => FinishReason::Error,
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

impl OpenAIMessage {
    fn from_request(request: &CompletionRequest) -> Vec<Self> {
        request
            .messages
            .iter()
            .map(|m| Self {
                role: role_str(m.role).to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAIUsage> for TokenUsage {
    fn from(u: OpenAIUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// Streaming types

#[derive(Deserialize, Debug)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = OpenAIRequest {
            model: self.model.clone(),
            messages: OpenAIMessage::from_request(&request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: None,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "OpenAI").await);
        }

        let data: OpenAIResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Llm("No response from OpenAI".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: map_finish_reason(&choice.finish_reason),
            usage: data.usage.map(TokenUsage::from),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            let body = OpenAIRequest {
                model,
                messages: OpenAIMessage::from_request(&request),
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                stream: Some(true),
            };

            let response = match client
                .post(format!("{}/chat/completions", base_url))
                .header("Authorization", format!("Bearer {}", api_key))
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
                yield Err(response_to_error(response, "OpenAI").await);
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

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
                        if data.trim() == "[DONE]" {
                            continue;
                        }

                        let parsed: OpenAIStreamResponse = match serde_json::from_str(data) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };

                        // Usage arrives in a trailing event without choices
                        if let Some(usage) = parsed.usage {
                            yield Ok(StreamChunk::final_chunk(
                                FinishReason::Stop,
                                Some(TokenUsage::from(usage)),
                            ));
                            continue;
                        }

                        for choice in parsed.choices {
                            if let Some(finish_reason) = choice.finish_reason {
                                let reason = map_finish_reason(&finish_reason);
                                if reason != FinishReason::Stop {
                                    yield Ok(StreamChunk::final_chunk(reason, None));
                                }
                                continue;
                            }

                            if let Some(content) = choice.delta.content
                                && !content.is_empty()
                            {
                                yield Ok(StreamChunk::text(&content));
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
                if data.trim() == "[DONE]" || data.trim().is_empty() {
                    continue;
                }

                // Best effort: try to parse the final event
                let Ok(parsed) = serde_json::from_str::<OpenAIStreamResponse>(data) else {
                    continue;
                };

                if let Some(usage) = parsed.usage {
                    yield Ok(StreamChunk::final_chunk(
                        FinishReason::Stop,
                        Some(TokenUsage::from(usage)),
                    ));
                    continue;
                }

                for choice in parsed.choices {
                    if let Some(finish_reason) = choice.finish_reason {
                        let reason = map_finish_reason(&finish_reason);
                        if reason != FinishReason::Stop {
                            yield Ok(StreamChunk::final_chunk(reason, None));
                        }
                        continue;
                    }

                    if let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        yield Ok(StreamChunk::text(&content));
                    }
                }
            }
        })
    }
}
