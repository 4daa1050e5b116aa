use {
    anyhow::Result,
    async_trait::async_trait,
    courier_common::types::ReplyPayload,
    serde::{Deserialize, Serialize},
};

/// Telegram's message limit; a safe default for adapters that do not say.
pub const DEFAULT_MAX_TEXT_LEN: usize = 4_096;

/// What a channel can do. Outbound shaping reads this instead of knowing
/// about individual platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    /// Longest text a single message may carry, in characters.
    pub max_text_len: usize,
    pub supports_media: bool,
    pub supports_threads: bool,
    pub supports_groups: bool,
}

impl Default for ChannelCapabilities {
    fn default() -> Self {
        Self {
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            supports_media: false,
            supports_threads: false,
            supports_groups: false,
        }
    }
}

/// Where to send a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReplyTarget {
    pub channel_id: String,
    pub account_id: String,
    /// Chat/peer ID to send the reply to.
    pub chat_id: String,
    /// Inbound message being answered, for reactions and threading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities::default()
    }

    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<()>;

    async fn send_media(&self, account_id: &str, to: &str, payload: &ReplyPayload) -> Result<()>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _account_id: &str, _to: &str) -> Result<()> {
        Ok(())
    }

    /// React to a message with an emoji. No-op by default.
    async fn send_reaction(&self, _account_id: &str, _to: &str, _message_id: &str, _emoji: &str) -> Result<()> {
        Ok(())
    }
}
