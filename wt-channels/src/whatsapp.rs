use crate::traits::ChannelAdapter;
use crate::types::OutboundMessage;
use anyhow::{Result, anyhow};
use reqwest::Url;

const DEFAULT_GRAPH_API_VERSION: &str = "v21.0";

#[derive(Clone)]
pub struct WhatsAppCloudAdapter {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
    graph_api_version: String,
}

impl WhatsAppCloudAdapter {
    pub fn new(access_token: &str, phone_number_id: &str) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("whatsapp access token is required"));
        }
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(anyhow!("whatsapp phone number id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
            graph_api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
        })
    }

    pub fn with_graph_api_version(mut self, version: &str) -> Self {
        let version = version.trim();
        if !version.is_empty() {
            self.graph_api_version = version.to_string();
        }
        self
    }

    fn messages_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "https://graph.facebook.com/{}/{}/messages",
            self.graph_api_version, self.phone_number_id
        ))
        .map_err(|e| anyhow!("invalid whatsapp graph API URL: {e}"))
    }

    async fn post_messages(&self, payload: &serde_json::Value, op: &str) -> Result<()> {
        let url = self.messages_url()?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("whatsapp {op} failed: status={status} body={body}"));
        }
        Ok(())
    }
}

fn text_payload(to: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": body,
        }
    })
}

fn read_receipt_payload(message_id: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
    })
}

#[async_trait::async_trait]
impl ChannelAdapter for WhatsAppCloudAdapter {
    #[tracing::instrument(level = "debug", skip(self, message))]
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<()> {
        let to = recipient_id.trim();
        if to.is_empty() {
            return Err(anyhow!("recipient_id (E.164 phone number) is required"));
        }
        let text = message.content.trim();
        if text.is_empty() {
            return Err(anyhow!("message content is empty"));
        }
        self.post_messages(&text_payload(to, text), "send").await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_read(&self, message_id: &str) -> Result<()> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(anyhow!("message_id is required"));
        }
        self.post_messages(&read_receipt_payload(message_id), "mark_read")
            .await
    }
}
