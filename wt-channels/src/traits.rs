use crate::types::OutboundMessage;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Send a message to a specific user on this platform.
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<()>;

    /// Mark an inbound message as read. Channels without read receipts keep the default.
    async fn mark_read(&self, _message_id: &str) -> Result<()> {
        Err(anyhow::anyhow!("mark_read is not supported by this channel"))
    }
}
