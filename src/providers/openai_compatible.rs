use super::*;
use anyhow::Context;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// OpenAI-style chat completions: OpenAI itself, Ollama, LM Studio, llama.cpp.
pub struct OpenAICompatibleProvider {
    name: String,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAICompatibleProvider {
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

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAICompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, messages: &[Message], config: &GenerationConfig) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url());
        let request = ChatCompletionRequest {
            model: &config.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
        };

        tracing::debug!(provider = %self.name, model = %config.model, "Sending completion request to {}", url);
        let mut http = self.client.post(&url).json(&request);
        if let Some(key) = config.api_key.as_ref().or(self.config.api_key.as_ref()) {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.name))?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", self.name))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::EmptyResponse(self.name.clone()).into())
    }
}
