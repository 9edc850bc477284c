use super::*;
use anyhow::Context;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// Anthropic API structures
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicProvider {
    name: String,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(name: &str, config: ProviderConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            name: name.to_string(),
            config,
            client: builder.build()?,
        })
    }

    /// System messages move to the top-level `system` field; the rest keep order.
    fn split_system<'a>(messages: &'a [Message]) -> (Option<String>, Vec<AnthropicMessage<'a>>) {
        let mut system: Vec<&str> = Vec::new();
        let mut turns = Vec::new();

        for msg in messages {
            match msg.role {
                MessageRole::System => system.push(&msg.content),
                MessageRole::User | MessageRole::Assistant => turns.push(AnthropicMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                }),
            }
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, turns)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, messages: &[Message], config: &GenerationConfig) -> Result<String> {
        let api_key = config
            .api_key
            .as_ref()
            .or(self.config.api_key.as_ref())
            .ok_or_else(|| ProviderError::MissingApiKey(self.name.clone()))?;

        let url = format!(
            "{}/messages",
            self.config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
        );

        let (system, messages) = Self::split_system(messages);
        let request = AnthropicRequest {
            model: &config.model,
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            system,
        };

        tracing::debug!(provider = %self.name, model = %config.model, "Calling Anthropic Messages API");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Anthropic")?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let content = body
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(ProviderError::EmptyResponse(self.name.clone()).into());
        }
        Ok(content)
    }
}
