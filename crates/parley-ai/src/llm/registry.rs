//! Provider registry mapping provider names to client factories
//!
//! Misconfiguration (unknown name, absent credential) is detected here,
//! before any network-capable client is constructed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderSettings;
use crate::error::{ChatError, Result};
use crate::llm::client::LlmClient;
use crate::llm::{AnthropicClient, GeminiClient, OpenAIClient};

/// Builds a concrete client for one named provider.
pub trait ProviderFactory: Send + Sync {
    /// The provider name this factory registers under.
    fn name(&self) -> &str;

    /// Build a client from already-validated provider settings.
    fn build(&self, config: &ProviderSettings) -> Result<Arc<dyn LlmClient>>;
}

struct OpenAIFactory;

impl ProviderFactory for OpenAIFactory {
    fn name(&self) -> &str {
        "openai"
    }

    fn build(&self, config: &ProviderSettings) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(
            OpenAIClient::new(&config.api_key).with_model(&config.model),
        ))
    }
}

struct AnthropicFactory;

impl ProviderFactory for AnthropicFactory {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn build(&self, config: &ProviderSettings) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(
            AnthropicClient::new(&config.api_key).with_model(&config.model),
        ))
    }
}

struct GeminiFactory;

impl ProviderFactory for GeminiFactory {
    fn name(&self) -> &str {
        "gemini"
    }

    fn build(&self, config: &ProviderSettings) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(
            GeminiClient::new(&config.api_key).with_model(&config.model),
        ))
    }
}

/// Registry of provider factories keyed by provider name.
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in providers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GeminiFactory));
        registry.register(Arc::new(OpenAIFactory));
        registry.register(Arc::new(AnthropicFactory));
        registry
    }

    /// Register a factory under its declared name. Last write wins, which
    /// lets tests swap in doubles for built-in providers.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Registered provider names. Order is unspecified.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Create a client for the named provider, validating the configuration
    /// before constructing anything.
    pub fn create(&self, name: &str, config: &ProviderSettings) -> Result<Arc<dyn LlmClient>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let mut available = self.names();
            available.sort();
            tracing::error!(provider = name, ?available, "Unknown LLM provider requested");
            ChatError::UnknownProvider(name.to_string())
        })?;

        if config.api_key.trim().is_empty() {
            return Err(ChatError::MissingApiKey(name.to_string()));
        }

        factory.build(config)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
