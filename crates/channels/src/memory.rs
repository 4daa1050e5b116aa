//! An in-memory outbound that records everything it is asked to send.
//! Useful for local runs and for exercising delivery without a network.

use std::sync::Mutex;

use {async_trait::async_trait, courier_common::types::ReplyPayload};

use crate::{
    error::Error,
    plugin::{ChannelCapabilities, ChannelOutbound},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        account_id: String,
        to: String,
        text: String,
    },
    Media {
        account_id: String,
        to: String,
        url: String,
    },
    Typing {
        account_id: String,
        to: String,
    },
    Reaction {
        account_id: String,
        to: String,
        message_id: String,
        emoji: String,
    },
}

#[derive(Debug, Default)]
pub struct MemoryOutbound {
    capabilities: ChannelCapabilities,
    sent: Mutex<Vec<Sent>>,
    /// Text sends left before every further text send fails.
    fail_after: Mutex<Option<usize>>,
}

impl MemoryOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_text_len: usize) -> Self {
        Self::with_capabilities(ChannelCapabilities {
            max_text_len,
            ..Default::default()
        })
    }

    pub fn with_capabilities(capabilities: ChannelCapabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }

    /// Let `n` more text sends succeed, then fail the rest.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn typing_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Typing { .. }))
            .count()
    }

    pub fn reactions(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Reaction { emoji, .. } => Some(emoji),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sent);
    }
}

#[async_trait]
impl ChannelOutbound for MemoryOutbound {
    fn capabilities(&self) -> ChannelCapabilities {
        self.capabilities
    }

    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> anyhow::Result<()> {
        if text.chars().count() > self.capabilities.max_text_len {
            return Err(Error::invalid_input(format!(
                "text of {} chars exceeds limit {}",
                text.chars().count(),
                self.capabilities.max_text_len
            ))
            .into());
        }
        {
            let mut fail_after = self.fail_after.lock().unwrap_or_else(|e| e.into_inner());
            match fail_after.as_mut() {
                Some(0) => {
                    return Err(Error::external(
                        "send_text",
                        std::io::Error::other("connection lost"),
                    )
                    .into());
                },
                Some(left) => *left -= 1,
                None => {},
            }
        }
        self.record(Sent::Text {
            account_id: account_id.to_string(),
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(&self, account_id: &str, to: &str, payload: &ReplyPayload) -> anyhow::Result<()> {
        let Some(media) = &payload.media else {
            return Err(Error::invalid_input("media payload without media").into());
        };
        self.record(Sent::Media {
            account_id: account_id.to_string(),
            to: to.to_string(),
            url: media.url.clone(),
        });
        Ok(())
    }

    async fn send_typing(&self, account_id: &str, to: &str) -> anyhow::Result<()> {
        self.record(Sent::Typing {
            account_id: account_id.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    async fn send_reaction(&self, account_id: &str, to: &str, message_id: &str, emoji: &str) -> anyhow::Result<()> {
        self.record(Sent::Reaction {
            account_id: account_id.to_string(),
            to: to.to_string(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }
}
