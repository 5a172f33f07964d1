use crate::anthropic::AnthropicClient;
use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse, ResponseFormat};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl Provider {
    pub fn for_model(model: &str) -> Self {
        let m = model.trim().to_ascii_lowercase();
        if m.starts_with("claude-") {
            return Provider::Anthropic;
        }
        Provider::OpenAI
    }
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            provider: Provider::for_model(model),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(provider = ?self.provider, model = %self.model)
    )]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "at least one message is required".to_string(),
            ));
        }
        let response = match self.provider {
            Provider::OpenAI => {
                OpenAiClient::new(self.client.clone(), &self.api_key, &self.model)
                    .chat(messages, format)
                    .await?
            }
            Provider::Anthropic => {
                AnthropicClient::new(self.client.clone(), &self.api_key, &self.model)
                    .chat(messages)
                    .await?
            }
        };
        tracing::debug!(
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = %response.finish_reason,
            "llm chat completed"
        );
        Ok(response)
    }
}
