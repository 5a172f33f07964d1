//! Chat channel adapters for WhatsTrack.
//!
//! Adapters are pure I/O: inbound events arrive through the webhook in `wt-app`
//! and are normalized to [`InboundMessage`]; replies leave through
//! [`ChannelAdapter::send`].

mod traits;
mod types;
mod whatsapp;

pub use traits::ChannelAdapter;
pub use types::{InboundMessage, MessageId, OutboundMessage, SenderId};
pub use whatsapp::WhatsAppCloudAdapter;
