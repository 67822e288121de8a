//! Google Gemini LLM provider

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

/// Google Gemini client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "gemini-2.0-flash-exp".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
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
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl GeminiRequest {
    /// Gemini takes the system instruction out of band and only knows the
    /// "user" and "model" conversation roles.
    fn from_request(request: &CompletionRequest) -> Self {
        let system_instruction = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            });

        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GeminiContent {
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        Self {
            system_instruction,
            contents,
            generation_config,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<GeminiUsage> for TokenUsage {
    fn from(u: GeminiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") => FinishReason::MaxTokens,
        Some("STOP") | None => FinishReason::Stop,
        _ => FinishReason::Error,
    }
}

fn candidate_text(candidate: &GeminiCandidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|c| {
            c.parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = GeminiRequest::from_request(&request);

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "Gemini").await);
        }

        let data: GeminiResponse = response.json().await?;
        let candidate = data
            .candidates
            .first()
            .ok_or_else(|| ChatError::Llm("No response from Gemini".to_string()))?;

        Ok(CompletionResponse {
            content: candidate_text(candidate),
            finish_reason: map_finish_reason(candidate.finish_reason.as_deref()),
            usage: data.usage_metadata.map(TokenUsage::from),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();
        let base_url = self.base_url.clone();

        Box::pin(async_stream::stream! {
            let body = GeminiRequest::from_request(&request);

            let response = match client
                .post(format!(
                    "{}/models/{}:streamGenerateContent?alt=sse",
                    base_url, model
                ))
                .header("x-goog-api-key", &api_key)
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
                yield Err(response_to_error(response, "Gemini").await);
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
                        if data.trim().is_empty() {
                            continue;
                        }

                        let parsed: GeminiResponse = match serde_json::from_str(data) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };

                        for candidate in &parsed.candidates {
                            let text = candidate_text(candidate);
                            if !text.is_empty() {
                                yield Ok(StreamChunk::text(text));
                            }

                            if let Some(reason) = candidate.finish_reason.as_deref() {
                                yield Ok(StreamChunk::final_chunk(
                                    map_finish_reason(Some(reason)),
                                    parsed.usage_metadata.as_ref().map(|u| TokenUsage {
                                        prompt_tokens: u.prompt_token_count,
                                        completion_tokens: u.candidates_token_count,
                                        total_tokens: u.total_token_count,
                                    }),
                                ));
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
                let Ok(parsed) = serde_json::from_str::<GeminiResponse>(data) else {
                    continue;
                };

                for candidate in &parsed.candidates {
                    let text = candidate_text(candidate);
                    if !text.is_empty() {
                        yield Ok(StreamChunk::text(text));
                    }

                    if let Some(reason) = candidate.finish_reason.as_deref() {
                        yield Ok(StreamChunk::final_chunk(
                            map_finish_reason(Some(reason)),
                            parsed.usage_metadata.as_ref().map(|u| TokenUsage {
                                prompt_tokens: u.prompt_token_count,
                                completion_tokens: u.candidates_token_count,
                                total_tokens: u.total_token_count,
                            }),
                        ));
                    }
                }
            }
        })
    }
}
