use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, ResponseFormat, Role, Usage};
use serde::{Deserialize, Serialize};

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<ChatResponse> {
        let req = OpenAiChatRequest::new(&self.model, messages, format);

        let response = self
            .http
            .post(OPENAI_CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Provider {
                provider: "openai",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

impl OpenAiChatRequest {
    fn new(model: &str, messages: &[ChatMessage], format: ResponseFormat) -> Self {
        Self {
            model: model.to_string(),
            messages: messages.iter().map(to_openai_message).collect(),
            response_format: match format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(OpenAiResponseFormat {
                    r#type: "json_object".to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    OpenAiMessage {
        role: role.to_string(),
        content: m.content.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("openai response missing choices".to_string())
        })?;
        let usage = v.usage.unwrap_or_default();
        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_mode_sets_response_format() {
        let messages = vec![ChatMessage::system("rules"), ChatMessage::user("hi")];
        let req = OpenAiChatRequest::new("gpt-5-mini", &messages, ResponseFormat::JsonObject);
        let value = serde_json::to_value(&req).expect("serialize request");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");

        let req = OpenAiChatRequest::new("gpt-5-mini", &messages, ResponseFormat::Text);
        let value = serde_json::to_value(&req).expect("serialize request");
        assert!(value.get("response_format").is_none());
    }

    #[test]
    fn response_without_choices_is_rejected() {
        let parsed: OpenAiChatResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("parse response");
        let err = ChatResponse::try_from(parsed).expect_err("missing choices");
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[test]
    fn response_content_and_usage_are_mapped() {
        let parsed: OpenAiChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"{\"action\":\"none\"}"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
        )
        .expect("parse response");
        let resp = ChatResponse::try_from(parsed).expect("map response");
        assert_eq!(resp.content, r#"{"action":"none"}"#);
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert_eq!(resp.finish_reason, "stop");
    }
}
