//! Process-wide settings for the chat service
//!
//! Loaded once at startup from environment variables and treated as
//! immutable for the process lifetime. Changing configuration requires a
//! restart. The core only ever reads from a loaded `Settings`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Default system prompt when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
    Provide clear, accurate, and concise responses to user queries.";

/// Default maximum number of messages kept per conversation
pub const DEFAULT_MEMORY_LIMIT: usize = 20;

/// Per-provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderSettings {
    fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            api_key: String::new(),
            model: model.into(),
            temperature: 0.7,
            max_tokens,
        }
    }
}

/// Immutable application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Active provider name ("gemini", "openai" or "anthropic")
    pub provider: String,
    pub gemini: ProviderSettings,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    /// System instruction synthesized into conversations that lack one
    pub system_prompt: String,
    /// Maximum number of messages kept per conversation, must be > 0
    pub memory_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            gemini: ProviderSettings::new("gemini-2.0-flash-exp", 8192),
            openai: ProviderSettings::new("gpt-4o-mini", 4096),
            anthropic: ProviderSettings::new("claude-3-5-haiku-20241022", 8192),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            provider: env_or("LLM_PROVIDER", defaults.provider).to_lowercase(),
            gemini: ProviderSettings {
                api_key: env_or("GOOGLE_API_KEY", defaults.gemini.api_key),
                model: env_or("GEMINI_MODEL", defaults.gemini.model),
                temperature: env_parse("GEMINI_TEMPERATURE", defaults.gemini.temperature)?,
                max_tokens: env_parse("GEMINI_MAX_TOKENS", defaults.gemini.max_tokens)?,
            },
            openai: ProviderSettings {
                api_key: env_or("OPENAI_API_KEY", defaults.openai.api_key),
                model: env_or("OPENAI_MODEL", defaults.openai.model),
                temperature: env_parse("OPENAI_TEMPERATURE", defaults.openai.temperature)?,
                max_tokens: env_parse("OPENAI_MAX_TOKENS", defaults.openai.max_tokens)?,
            },
            anthropic: ProviderSettings {
                api_key: env_or("ANTHROPIC_API_KEY", defaults.anthropic.api_key),
                model: env_or("ANTHROPIC_MODEL", defaults.anthropic.model),
                temperature: env_parse("ANTHROPIC_TEMPERATURE", defaults.anthropic.temperature)?,
                max_tokens: env_parse("ANTHROPIC_MAX_TOKENS", defaults.anthropic.max_tokens)?,
            },
            system_prompt: env_or("AGENT_SYSTEM_PROMPT", defaults.system_prompt),
            memory_limit: env_parse("CONVERSATION_MEMORY_LIMIT", defaults.memory_limit)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings values that the core depends on.
    pub fn validate(&self) -> Result<()> {
        if self.memory_limit == 0 {
            return Err(ChatError::Config(
                "conversation memory limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved settings for a built-in provider, by name.
    pub fn provider_settings(&self, name: &str) -> Option<&ProviderSettings> {
        match name {
            "gemini" => Some(&self.gemini),
            "openai" => Some(&self.openai),
            "anthropic" => Some(&self.anthropic),
            _ => None,
        }
    }

    /// Settings for the active provider.
    pub fn active_provider_settings(&self) -> Option<&ProviderSettings> {
        self.provider_settings(&self.provider)
    }
}

fn env_or(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default,
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    parse_value(key, std::env::var(key).ok(), default)
}

/// A set-but-unparseable value is a startup error, never defaulted away.
fn parse_value<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(value) if !value.trim().is_empty() => value.trim().parse().map_err(|_| {
            ChatError::Config(format!("invalid value for {key}: '{}'", value.trim()))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_configuration() {
        let settings = Settings::default();
        assert_eq!(settings.provider, "gemini");
        assert_eq!(settings.gemini.model, "gemini-2.0-flash-exp");
        assert_eq!(settings.openai.model, "gpt-4o-mini");
        assert_eq!(settings.anthropic.model, "claude-3-5-haiku-20241022");
        assert_eq!(settings.memory_limit, DEFAULT_MEMORY_LIMIT);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_memory_limit_is_rejected() {
        let settings = Settings {
            memory_limit: 0,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn unset_or_blank_values_fall_back_to_default() {
        assert_eq!(parse_value("CONVERSATION_MEMORY_LIMIT", None, 20).unwrap(), 20);
        assert_eq!(
            parse_value("CONVERSATION_MEMORY_LIMIT", Some("  ".to_string()), 20).unwrap(),
            20
        );
        assert_eq!(
            parse_value("CONVERSATION_MEMORY_LIMIT", Some("12".to_string()), 20).unwrap(),
            12
        );
    }

    #[test]
    fn malformed_value_is_rejected_naming_the_variable() {
        let err =
            parse_value("CONVERSATION_MEMORY_LIMIT", Some("twenty".to_string()), 20usize)
                .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("CONVERSATION_MEMORY_LIMIT"));
        assert!(err.to_string().contains("twenty"));

        let err = parse_value("OPENAI_TEMPERATURE", Some("warm".to_string()), 0.7f32).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn malformed_env_value_fails_startup() {
        // SAFETY: single-threaded mutation of a variable only this test reads.
        unsafe { std::env::set_var("GEMINI_MAX_TOKENS", "lots") };
        let result = Settings::from_env();
        unsafe { std::env::remove_var("GEMINI_MAX_TOKENS") };

        let err = result.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("GEMINI_MAX_TOKENS"));
    }

    #[test]
    fn provider_settings_lookup() {
        let settings = Settings::default();
        assert!(settings.provider_settings("openai").is_some());
        assert!(settings.provider_settings("anthropic").is_some());
        assert!(settings.provider_settings("gemini").is_some());
        assert!(settings.provider_settings("unknown").is_none());
        assert_eq!(
            settings.active_provider_settings().map(|p| p.model.as_str()),
            Some("gemini-2.0-flash-exp")
        );
    }
}
