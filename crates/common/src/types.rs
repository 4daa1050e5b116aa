//! Message types shared by the dispatcher, routing and channel adapters.

use std::{fmt, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
};

/// Where an inbound event came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Local command line.
    #[default]
    Cli,
    /// HTTP/WebSocket gateway client.
    Gateway,
    /// A messaging channel (Telegram, Discord, ...).
    Channel,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Gateway => "gateway",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direct message vs group conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
}

/// Callback receiving one coalesced block of streamed reply text.
pub type BlockCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Raw inbound event, as handed to the dispatcher by a source adapter.
#[derive(Clone, Default)]
pub struct InboundEvent {
    pub source: SourceKind,
    pub body: String,
    pub channel_id: Option<String>,
    pub account_id: Option<String>,
    pub peer_id: Option<String>,
    pub message_id: Option<String>,
    pub sender_name: Option<String>,
    pub media_urls: Vec<String>,
    pub is_group: bool,
    pub thread_id: Option<String>,
    /// Explicit session key (gateway clients pick their own session).
    pub session_key: Option<String>,
    /// Explicit agent id (CLI `--agent`); channel events use bindings instead.
    pub agent_id: Option<String>,
    pub cancel: Option<CancellationToken>,
    pub on_block: Option<BlockCallback>,
}

impl InboundEvent {
    #[must_use]
    pub fn cli(body: impl Into<String>) -> Self {
        Self {
            source: SourceKind::Cli,
            body: body.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn gateway(body: impl Into<String>) -> Self {
        Self {
            source: SourceKind::Gateway,
            body: body.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn channel(
        channel_id: impl Into<String>,
        peer_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source: SourceKind::Channel,
            channel_id: Some(channel_id.into()),
            peer_id: Some(peer_id.into()),
            body: body.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    #[must_use]
    pub fn with_sender(mut self, sender_name: impl Into<String>) -> Self {
        self.sender_name = Some(sender_name.into());
        self
    }

    #[must_use]
    pub fn in_group(mut self, thread_id: Option<String>) -> Self {
        self.is_group = true;
        self.thread_id = thread_id;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_block_callback(mut self, on_block: BlockCallback) -> Self {
        self.on_block = Some(on_block);
        self
    }

    /// The peer identity used for routing, with defaults filled in for
    /// sources that carry no channel identifiers.
    #[must_use]
    pub fn peer(&self) -> RoutePeer {
        RoutePeer {
            channel_id: self
                .channel_id
                .clone()
                .unwrap_or_else(|| self.source.as_str().to_string()),
            account_id: self
                .account_id
                .clone()
                .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string()),
            peer_id: self.peer_id.clone().unwrap_or_else(|| "local".to_string()),
            chat_type: if self.is_group {
                ChatType::Group
            } else {
                ChatType::Direct
            },
            thread_id: self.thread_id.clone(),
        }
    }
}

impl fmt::Debug for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundEvent")
            .field("source", &self.source)
            .field("channel_id", &self.channel_id)
            .field("account_id", &self.account_id)
            .field("peer_id", &self.peer_id)
            .field("message_id", &self.message_id)
            .field("body_len", &self.body.len())
            .field("media", &self.media_urls.len())
            .field("is_group", &self.is_group)
            .field("thread_id", &self.thread_id)
            .field("session_key", &self.session_key)
            .field("on_block", &self.on_block.is_some())
            .finish_non_exhaustive()
    }
}

/// Account id used when a source does not distinguish accounts.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// Routing identity of a conversation participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutePeer {
    pub channel_id: String,
    pub account_id: String,
    pub peer_id: String,
    pub chat_type: ChatType,
    pub thread_id: Option<String>,
}

/// Media attached to an outbound reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    pub mime_type: String,
}

/// An outbound reply ready to be handed to a channel adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
    pub media: Option<MediaAttachment>,
    /// Message ID to reply to (threading).
    pub reply_to_id: Option<String>,
    /// Send without notification.
    pub silent: bool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_peer_has_stable_defaults() {
        let peer = InboundEvent::cli("hello").peer();
        assert_eq!(peer.channel_id, "cli");
        assert_eq!(peer.account_id, DEFAULT_ACCOUNT_ID);
        assert_eq!(peer.peer_id, "local");
        assert_eq!(peer.chat_type, ChatType::Direct);
    }

    #[test]
    fn group_builder_sets_chat_type() {
        let peer = InboundEvent::channel("telegram", "-100", "hi")
            .with_account("bot1")
            .in_group(Some("42".into()))
            .peer();
        assert_eq!(peer.chat_type, ChatType::Group);
        assert_eq!(peer.thread_id.as_deref(), Some("42"));
        assert_eq!(peer.account_id, "bot1");
    }

    #[test]
    fn debug_hides_body() {
        let event = InboundEvent::cli("secret plans");
        let rendered = format!("{event:?}");
        assert!(!rendered.contains("secret plans"));
        assert!(rendered.contains("body_len"));
    }

    #[test]
    fn source_kind_serializes_lowercase() {
        let json = serde_json::to_string(&SourceKind::Channel).unwrap();
        assert_eq!(json, "\"channel\"");
    }
}
