//! Conversation orchestration
//!
//! Turns an incoming user message plus stored history into a finalized
//! assistant reply, in batch or incremental mode. Both modes converge on a
//! single commit point: the user message and the finalized assistant message
//! are appended to the store together, after generation, so a failed or
//! cancelled generation never leaves an orphaned turn behind.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::config::Settings;
use crate::error::{ChatError, Result};
use crate::llm::{CompletionRequest, LlmClient, Message, ProviderRegistry};
use crate::memory::trim;
use crate::store::ConversationStore;

/// Lazily produced reply fragments. Dropping the stream before exhaustion
/// cancels generation without committing anything to history.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Clone, Copy)]
struct GenerationParams {
    temperature: f32,
    max_tokens: u32,
}

/// Chat orchestrator over one provider client and the conversation store.
#[derive(Clone)]
pub struct ChatService {
    settings: Arc<Settings>,
    client: Arc<dyn LlmClient>,
    store: Arc<ConversationStore>,
    generation: GenerationParams,
}

impl ChatService {
    /// Build a service for the configured provider. Configuration problems
    /// (unknown provider, missing credential, bad limits) surface here,
    /// before any request is served.
    pub fn new(settings: Arc<Settings>, registry: &ProviderRegistry) -> Result<Self> {
        settings.validate()?;

        let provider_config = settings
            .active_provider_settings()
            .ok_or_else(|| ChatError::UnknownProvider(settings.provider.clone()))?;
        let client = registry.create(&settings.provider, provider_config)?;

        tracing::info!(
            provider = client.provider(),
            model = client.model(),
            memory_limit = settings.memory_limit,
            "Chat service initialized"
        );

        let generation = GenerationParams {
            temperature: provider_config.temperature,
            max_tokens: provider_config.max_tokens,
        };

        Ok(Self {
            settings,
            client,
            store: Arc::new(ConversationStore::new()),
            generation,
        })
    }

    /// Build a service around an explicit client, bypassing the registry.
    /// Used for test doubles and embedded setups.
    pub fn with_client(settings: Arc<Settings>, client: Arc<dyn LlmClient>) -> Self {
        let generation = settings
            .active_provider_settings()
            .map(|p| GenerationParams {
                temperature: p.temperature,
                max_tokens: p.max_tokens,
            })
            .unwrap_or(GenerationParams {
                temperature: 0.7,
                max_tokens: 1024,
            });

        Self {
            settings,
            client,
            store: Arc::new(ConversationStore::new()),
            generation,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    /// Working copy for one generation: stored history plus the in-flight
    /// user message, with a system instruction synthesized from settings
    /// when the history has none, trimmed to the memory limit. The
    /// synthesized system message is never committed to the store.
    fn build_prompt(&self, history: &[Message], user_message: &str) -> Vec<Message> {
        let mut working = history.to_vec();
        working.push(Message::user(user_message));

        if !working.iter().any(|m| m.is_system()) {
            working.insert(0, Message::system(&self.settings.system_prompt));
        }

        trim(&working, self.settings.memory_limit)
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest::new(messages)
            .with_temperature(self.generation.temperature)
            .with_max_tokens(self.generation.max_tokens)
    }

    /// Produce a complete reply for `user_message` in the given conversation.
    ///
    /// Generation failures never escape: they are folded into an apology
    /// reply so the conversation always gains an assistant turn.
    pub async fn respond(&self, conversation_id: &str, user_message: &str) -> String {
        let handle = self.store.get_or_create(conversation_id);
        // Held for the whole turn so same-id requests commit in arrival order.
        let mut history = handle.lock().await;

        let prompt = self.build_prompt(&history, user_message);
        tracing::debug!(
            conversation_id,
            prompt_messages = prompt.len(),
            "Dispatching batch completion"
        );

        let content = match self.client.complete(self.request(prompt)).await {
            Ok(response) => response.content,
            Err(err) => {
                tracing::warn!(
                    conversation_id,
                    error = %err,
                    "Generation failed, replying with apology turn"
                );
                apology(&err)
            }
        };

        history.push(Message::user(user_message));
        history.push(Message::assistant(content.clone()));
        content
    }

    /// Produce a reply as a lazy sequence of fragments.
    ///
    /// Fragments are forwarded as the provider produces them while the full
    /// reply is accumulated; once the provider stream ends, the turn is
    /// committed exactly as in [`respond`](Self::respond). A mid-stream
    /// failure replaces the accumulated reply with an apology, delivered as
    /// one final fragment; fragments already sent are not retracted.
    pub fn respond_stream(&self, conversation_id: String, user_message: String) -> FragmentStream {
        let service = self.clone();

        Box::pin(async_stream::stream! {
            let handle = service.store.get_or_create(&conversation_id);
            let mut history = handle.lock().await;

            let prompt = service.build_prompt(&history, &user_message);
            tracing::debug!(
                conversation_id,
                prompt_messages = prompt.len(),
                "Dispatching streaming completion"
            );

            let mut chunks = service.client.complete_stream(service.request(prompt));
            let mut full = String::new();

            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        if !chunk.text.is_empty() {
                            full.push_str(&chunk.text);
                            yield chunk.text;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            conversation_id,
                            error = %err,
                            "Streaming generation failed, replying with apology turn"
                        );
                        let message = apology(&err);
                        full = message.clone();
                        yield message;
                        break;
                    }
                }
            }
            drop(chunks);

            history.push(Message::user(user_message));
            history.push(Message::assistant(full));
        })
    }
}

fn apology(err: &ChatError) -> String {
    format!("I apologize, but I encountered an error: {err}")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;

    use super::*;
    use crate::llm::{
        CompletionResponse, FinishReason, MockLlmClient, MockStep, Role, StreamResult,
    };

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::default())
    }

    fn service_with_steps(steps: Vec<MockStep>) -> ChatService {
        ChatService::with_client(
            settings(),
            Arc::new(MockLlmClient::from_steps("mock-model", steps)),
        )
    }

    /// Echoing service (empty script) for multi-turn tests.
    fn echo_service() -> ChatService {
        service_with_steps(vec![])
    }

    async fn drain(stream: FragmentStream) -> Vec<String> {
        stream.collect().await
    }

    #[tokio::test]
    async fn batch_returns_content_and_commits_two_messages() {
        let service = service_with_steps(vec![MockStep::text("Hi there!")]);

        let content = service.respond("conv-1", "Hello").await;
        assert!(!content.is_empty());
        assert_eq!(content, "Hi there!");

        let history = service.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::user("Hello"));
        assert_eq!(history[1], Message::assistant("Hi there!"));
    }

    #[tokio::test]
    async fn history_grows_two_per_turn_alternating() {
        let service = echo_service();

        for turn in 0..3 {
            service.respond("conv-1", &format!("turn {turn}")).await;
        }

        let history = service.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 6);
        for (i, message) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(message.role, expected, "message {i}");
        }
    }

    #[tokio::test]
    async fn stream_yields_fragments_then_commits_concatenation() {
        let service = service_with_steps(vec![MockStep::fragments(["Hel", "lo"])]);

        let fragments = drain(service.respond_stream("conv-1".into(), "hi".into())).await;
        assert_eq!(fragments, ["Hel", "lo"]);

        let history = service.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], Message::assistant("Hello"));
    }

    #[tokio::test]
    async fn drained_stream_and_batch_commit_identical_history() {
        let batch = echo_service();
        let streaming = echo_service();

        let batch_content = batch.respond("conv-1", "Hello").await;
        let fragments = drain(streaming.respond_stream("conv-1".into(), "Hello".into())).await;
        assert_eq!(fragments.concat(), batch_content);

        let batch_history = batch.store().history("conv-1").await.unwrap();
        let stream_history = streaming.store().history("conv-1").await.unwrap();
        assert_eq!(batch_history, stream_history);
    }

    #[tokio::test]
    async fn batch_failure_still_commits_apology_turn() {
        let service = service_with_steps(vec![MockStep::error("quota exceeded")]);

        let content = service.respond("conv-1", "Hello").await;
        assert!(content.contains("I apologize"));
        assert!(content.contains("quota exceeded"));

        let history = service.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert!(history[1].content.contains("I apologize"));
    }

    #[tokio::test]
    async fn stream_failure_yields_apology_fragment_and_commits_it() {
        let service = service_with_steps(vec![MockStep::error("connection reset")]);

        let fragments = drain(service.respond_stream("conv-1".into(), "Hello".into())).await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("I apologize"));
        assert!(fragments[0].contains("connection reset"));

        let history = service.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, fragments[0]);
    }

    #[tokio::test]
    async fn abandoned_stream_commits_nothing() {
        let service = service_with_steps(vec![MockStep::fragments(["a", "b", "c"])]);

        {
            let mut stream = service.respond_stream("conv-1".into(), "Hello".into());
            let first = stream.next().await;
            assert_eq!(first.as_deref(), Some("a"));
            // Consumer disconnects here.
        }

        let history = service.store().history("conv-1").await.unwrap();
        assert!(history.is_empty(), "partial turn must not be committed");
    }

    #[tokio::test]
    async fn failed_turn_stays_in_history_for_next_prompt() {
        let service = service_with_steps(vec![MockStep::error("boom"), MockStep::text("ok now")]);

        service.respond("conv-1", "first").await;
        let second = service.respond("conv-1", "second").await;
        assert_eq!(second, "ok now");

        let history = service.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 4);
    }

    /// Records the prompts it receives so tests can observe what the
    /// orchestrator actually sends to the provider.
    struct RecordingClient {
        prompts: Mutex<Vec<Vec<Message>>>,
    }

    impl RecordingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        fn provider(&self) -> &str {
            "recording"
        }

        fn model(&self) -> &str {
            "recording"
        }

        async fn complete(&self, request: CompletionRequest) -> crate::error::Result<CompletionResponse> {
            self.prompts.lock().unwrap().push(request.messages);
            Ok(CompletionResponse {
                content: "ok".to_string(),
                finish_reason: FinishReason::Stop,
                usage: None,
            })
        }

        fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
            self.prompts.lock().unwrap().push(request.messages);
            Box::pin(futures::stream::once(async {
                Ok(crate::llm::StreamChunk::text("ok"))
            }))
        }
    }

    #[tokio::test]
    async fn prompt_gets_synthesized_system_message_not_stored() {
        let recorder = RecordingClient::new();
        let service = ChatService::with_client(settings(), recorder.clone());

        service.respond("conv-1", "Hello").await;

        let prompts = recorder.prompts.lock().unwrap();
        assert!(prompts[0][0].is_system());
        assert_eq!(prompts[0][0].content, settings().system_prompt);

        drop(prompts);
        let history = service.store().history("conv-1").await.unwrap();
        assert!(history.iter().all(|m| !m.is_system()));
    }

    #[tokio::test]
    async fn prompt_is_trimmed_to_memory_limit() {
        let small = Arc::new(Settings {
            memory_limit: 4,
            ..Settings::default()
        });
        let recorder = RecordingClient::new();
        let service = ChatService::with_client(small, recorder.clone());

        for turn in 0..6 {
            service.respond("conv-1", &format!("turn {turn}")).await;
        }

        let prompts = recorder.prompts.lock().unwrap();
        let last = prompts.last().unwrap();
        assert!(last.len() <= 4);
        assert!(last[0].is_system());
        // Most recent user message survives trimming.
        assert_eq!(last.last().unwrap().content, "turn 5");
    }

    #[tokio::test]
    async fn different_conversations_are_isolated() {
        let service = echo_service();

        service.respond("conv-a", "to a").await;
        service.respond("conv-b", "to b").await;

        let a = service.store().history("conv-a").await.unwrap();
        let b = service.store().history("conv-b").await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(a[0].content, "to a");
        assert_eq!(b[0].content, "to b");
    }
}
