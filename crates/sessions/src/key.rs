//! Session keys.
//!
//! Keys are plain strings so they can cross process and storage boundaries:
//!
//! - `agent:<agent>:main` for direct (CLI / gateway) conversations
//! - `agent:<agent>:<channel>:<account>:<unit>` for channel conversations,
//!   where `unit` is a peer id, `thread:<id>` or `shared`

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

const PREFIX: &str = "agent";
pub const SHARED_UNIT: &str = "shared";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

/// Lowercase, trimmed, `:` replaced so segments never collide.
fn segment(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.to_lowercase().replace(':', "_")
}

/// Trimmed only; peer and thread ids can be case sensitive.
fn id_segment(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.replace(':', "_")
}

impl SessionKey {
    /// Wrap an externally supplied key as-is.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The agent's direct conversation.
    #[must_use]
    pub fn main(agent_id: &str) -> Self {
        Self(format!("{PREFIX}:{}:main", segment(agent_id)))
    }

    #[must_use]
    pub fn peer(agent_id: &str, channel: &str, account_id: &str, peer_id: &str) -> Self {
        Self::channel(agent_id, channel, account_id, &id_segment(peer_id))
    }

    #[must_use]
    pub fn thread(agent_id: &str, channel: &str, account_id: &str, thread_id: &str) -> Self {
        Self::channel(agent_id, channel, account_id, &format!("thread:{}", id_segment(thread_id)))
    }

    #[must_use]
    pub fn shared(agent_id: &str, channel: &str, account_id: &str) -> Self {
        Self::channel(agent_id, channel, account_id, SHARED_UNIT)
    }

    fn channel(agent_id: &str, channel: &str, account_id: &str, unit: &str) -> Self {
        Self(format!(
            "{PREFIX}:{}:{}:{}:{unit}",
            segment(agent_id),
            segment(channel),
            segment(account_id)
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The agent id embedded in a well-formed key.
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        let mut parts = self.0.splitn(3, ':');
        match (parts.next(), parts.next()) {
            (Some(PREFIX), Some(agent)) if !agent.is_empty() => Some(agent),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
