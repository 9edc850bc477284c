use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub mod anthropic;
pub mod cli;
pub mod mock;
pub mod openai_compatible;

pub use anthropic::AnthropicProvider;
pub use cli::CliProvider;
pub use mock::MockProvider;
pub use openai_compatible::OpenAICompatibleProvider;

/// Represents a message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Per-call settings taken from the agent's configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub api_key: Option<String>,
}

impl From<&crate::board::AgentConfig> for GenerationConfig {
    fn from(config: &crate::board::AgentConfig) -> Self {
        Self {
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

/// Connection settings for a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Executable for CLI-backed providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompatible,
    Anthropic,
    Cli,
    Mock,
}

/// Main trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider name
    fn name(&self) -> &str;

    /// Produce one completion for the conversation
    async fn generate(&self, messages: &[Message], config: &GenerationConfig) -> Result<String>;
}

/// Builds a provider of the given kind, registered under `name`.
pub fn build_provider(name: &str, kind: ProviderKind, config: ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::OpenaiCompatible => Arc::new(OpenAICompatibleProvider::new(name, config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(name, config)?),
        ProviderKind::Cli => Arc::new(CliProvider::new(name, config)?),
        ProviderKind::Mock => Arc::new(MockProvider::named(name)),
    };
    Ok(provider)
}

/// Provider registry for managing multiple providers
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    fallback: Option<String>,
}

impl ProviderRegistry {
    /// Registry with the `mock` provider only.
    pub fn new() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            fallback: None,
        };
        registry.register(Arc::new(MockProvider::new()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Provider used when an agent names one that is not registered.
    pub fn set_fallback(&mut self, name: Option<String>) {
        self.fallback = name;
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn list_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub async fn generate(
        &self,
        messages: &[Message],
        provider_name: &str,
        config: &GenerationConfig,
    ) -> Result<String> {
        let provider = match self.get(provider_name) {
            Some(provider) => provider,
            None => {
                let fallback = self.fallback.as_deref().and_then(|name| self.get(name));
                match fallback {
                    Some(provider) => {
                        tracing::debug!(
                            "Provider '{}' not registered, using '{}'",
                            provider_name,
                            provider.name()
                        );
                        provider
                    }
                    None => return Err(ProviderError::UnknownProvider(provider_name.to_string()).into()),
                }
            }
        };

        provider.generate(messages, config).await
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types for providers
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider not found: {0}")]
    UnknownProvider(String),

    #[error("API key not configured for {0}")]
    MissingApiKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("CLI provider failed ({status}): {stderr}")]
    Cli { status: String, stderr: String },
}

/// Maps a non-success HTTP response onto a provider error.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimit;
    }
    let body = response.text().await.unwrap_or_default();
    ProviderError::ApiError {
        status: status.as_u16(),
        body,
    }
}
