use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, Usage};
use serde::{Deserialize, Serialize};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 2048;

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let req = AnthropicRequest::new(&self.model, messages)?;

        let response = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Provider {
                provider: "anthropic",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
}

impl AnthropicRequest {
    fn new(model: &str, messages: &[ChatMessage]) -> Result<Self> {
        let mut system = String::new();
        let mut out_messages = Vec::new();

        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::User => out_messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: m.content.clone(),
                }),
                Role::Assistant => out_messages.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: m.content.clone(),
                }),
            }
        }

        if out_messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "anthropic requires at least one non-system message".to_string(),
            ));
        }

        Ok(Self {
            model: model.to_string(),
            max_tokens: ANTHROPIC_MAX_TOKENS,
            system,
            messages: out_messages,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: String,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl TryFrom<AnthropicResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: AnthropicResponse) -> Result<Self> {
        let mut content = String::new();
        for block in v.content {
            if let AnthropicContentBlock::Text { text } = block {
                content.push_str(&text);
            }
        }

        Ok(ChatResponse {
            content,
            usage: Usage {
                prompt_tokens: v.usage.input_tokens as u32,
                completion_tokens: v.usage.output_tokens as u32,
            },
            finish_reason: v.stop_reason,
        })
    }
}
